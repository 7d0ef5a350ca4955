//! Core providers and the provider registry.
//!
//! ## Contents
//! - [`WorkerCoreProvider`] supply source trait (`request_core`)
//! - [`SemaphoreCoreProvider`] ready-made provider over a counting semaphore
//! - [`ProviderCollection`] dynamic set of providers shared with the multi-source fulfiller

mod collection;
mod provider;
mod semaphore;

pub use collection::ProviderCollection;
pub use provider::{ProviderRef, WorkerCoreProvider};
pub use semaphore::{SemaphoreCoreProvider, SlotCore};
