//! # Subscribe: observing a worker pool.
//!
//! Implement [`Subscribe`] to watch demand and supply (logging, metrics, a dashboard of
//! local and remote load). Every subscriber is driven by its own task fed from a bounded
//! queue, so a slow or panicking subscriber never stalls the registry or the other
//! subscribers.
//!
//! ```text
//! SubscriberSet::emit ──► queue (queue_capacity) ──► worker ──► on_event(&Event)
//!                              │ full                   └─ panic ─► SubscriberPanicked
//!                              └─► event skipped for this subscriber, SubscriberOverflow
//! ```
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use corevisor::{Event, EventKind, Subscribe};
//!
//! struct Demand;
//!
//! #[async_trait]
//! impl Subscribe for Demand {
//!     async fn on_event(&self, ev: &Event) {
//!         if let (EventKind::RequestCreated, Some(stats)) = (ev.kind, ev.stats) {
//!             let _waiting = stats.unfulfilled_local + stats.unfulfilled_remotable;
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "demand" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receiver of pool events.
///
/// `on_event` runs on a runtime worker: keep it non-blocking and deal with its own
/// errors. A panic is caught and reported, the subscriber keeps receiving events.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    ///
    /// Called from a dedicated worker task, never in the publisher context, so it
    /// never runs under the request registry lock.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name used in logs and overflow/panic events.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this subscriber (clamped to at least 1).
    ///
    /// Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
