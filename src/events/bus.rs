//! # Event bus for request, provider and fulfiller events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]. It is shared by every component of a
//! worker pool: the request registry, the provider registry and both fulfillers
//! publish into it, and anything that wants to observe changes subscribes to it.
//!
//! ## Architecture
//! ```text
//! Publishers:                             Receivers:
//!   RequestCollection   ──┐         ┌──► SingleSourceFulfiller (wake-ups)
//!   ProviderCollection  ──┼──► Bus ─┼──► MultipleSourceFulfiller (wake-ups)
//!   Fulfillers          ──┤         ├──► pool subscriber listener ──► SubscriberSet
//!   SubscriberSet       ──┘         └──► user receivers (`subscribe()`)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks, so it is safe under a sync lock.
//! - **Bounded capacity**: one ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//!   Fulfillers treat a lag as "something changed" and rescan.
//! - **No persistence**: events are lost if there are no receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately.
/// - **Fire-and-forget**: no delivery or durability guarantees.
/// - **Cloneable**: cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    ///
    /// The capacity is shared across all receivers and clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// True if both handles publish into the same channel.
    pub fn same_channel(&self, other: &Bus) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn publish_without_receivers_is_a_noop() {
        let bus = Bus::new(4);
        bus.publish(Event::new(EventKind::ProviderAdded));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let bus = Bus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ProviderAdded));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::ProviderAdded);
    }

    #[tokio::test]
    async fn slow_receiver_observes_lag() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(Event::new(EventKind::RequestCreated));
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
    }
}
