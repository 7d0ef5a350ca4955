//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and the
//! built-in `LogWriter` (feature `logging`) for observing events broadcast through
//! the [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! RequestCollection / ProviderCollection / fulfillers
//!        │ publish(Event)
//!        ▼
//!       Bus ──► WorkerPool subscriber listener ──► SubscriberSet::emit
//!                                                     ├──► LogWriter
//!                                                     ├──► Metrics
//!                                                     └──► Custom ...
//! ```

#[cfg(feature = "logging")]
pub(crate) mod embedded;
mod set;
mod subscriber;

pub use set::SubscriberSet;
pub use subscriber::Subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
