//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to changes of the request registry, the provider registry,
//! the fulfillers and the subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `RequestCollection` (under its lock), `ProviderCollection`,
//!   `SingleSourceFulfiller`, `MultipleSourceFulfiller`, `SubscriberSet` workers.
//! - **Consumers**: the fulfiller loops (as wake-up signals), `WorkerPool`'s subscriber
//!   listener (fans out to `SubscriberSet`) and any user receiver.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
