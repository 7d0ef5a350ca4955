//! # Events emitted by the registries and the fulfillers.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Request events**: registry transitions (created, fulfilled, released)
//! - **Provider events**: provider registry changes (added, removed)
//! - **Supply events**: obtainment flow inside the fulfillers
//! - **Subscriber events**: fan-out worker problems (overflow, panic)
//!
//! The [`Event`] struct carries the metadata: request id and preference, provider id,
//! a statistics snapshot for request events, reasons and delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Request events are published while the registry lock is held, so `seq` also orders
//! the transitions of the registry.
//!
//! ## Example
//! ```rust
//! use corevisor::{CorePreference, Event, EventKind, RequestStatistics};
//!
//! let ev = Event::new(EventKind::RequestCreated)
//!     .with_preference(CorePreference::PreferRemote)
//!     .with_stats(RequestStatistics::default());
//!
//! assert!(ev.is_request_change());
//! assert_eq!(ev.preference, Some(CorePreference::PreferRemote));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::cores::CorePreference;
use crate::requests::{RequestId, RequestStatistics};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Request registry ===
    /// A request was registered as unfulfilled.
    ///
    /// Sets:
    /// - `request`, `preference`
    /// - `stats`: snapshot taken under the registry lock
    RequestCreated,

    /// A core was attached to a request.
    ///
    /// Sets:
    /// - `request`, `preference`
    /// - `provider`: provider id, when attached by a fulfiller
    /// - `stats`: snapshot taken under the registry lock
    RequestFulfilled,

    /// A request left the registry (released or dropped, fulfilled or not).
    ///
    /// Sets:
    /// - `request`, `preference`
    /// - `reason`: `"fulfilled"` or `"unfulfilled"`
    /// - `stats`: snapshot taken under the registry lock
    RequestReleased,

    // === Provider registry ===
    /// Provider registered.
    ///
    /// Sets:
    /// - `provider`: provider id
    ProviderAdded,

    /// Provider unregistered.
    ///
    /// Sets:
    /// - `provider`: provider id
    ProviderRemoved,

    // === Supply ===
    /// A fulfiller started a `request_core` call on a provider.
    ///
    /// Sets:
    /// - `provider`: provider id
    ObtainmentStarted,

    /// A `request_core` call returned a core.
    ///
    /// Sets:
    /// - `provider`: provider id
    CoreObtained,

    /// A fulfiller cancelled an in-flight `request_core` call (excess supply or removal).
    ///
    /// Sets:
    /// - `provider`: provider id
    ObtainmentCancelled,

    /// An obtained core failed its liveness check and was dropped.
    ///
    /// Sets:
    /// - `provider`: provider id
    DyingCoreDiscarded,

    /// A provider returned an error; the fulfiller will retry after a delay.
    ///
    /// Sets:
    /// - `provider`: provider id
    /// - `reason`: error message
    /// - `delay_ms`: retry delay
    ProviderFailed,

    /// A fulfiller loop started.
    ///
    /// Sets:
    /// - `reason`: fulfiller name
    FulfillerStarted,

    /// A fulfiller loop stopped and released everything it held.
    ///
    /// Sets:
    /// - `reason`: fulfiller name
    FulfillerStopped,

    // === Subscriber events ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Request the event is about.
    pub request: Option<RequestId>,
    /// Preference of that request.
    pub preference: Option<CorePreference>,
    /// Provider id.
    pub provider: Option<Arc<str>>,
    /// Subscriber name, for subscriber events.
    pub subscriber: Option<&'static str>,
    /// Registry counters at the moment of the transition.
    pub stats: Option<RequestStatistics>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Retry delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            request: None,
            preference: None,
            provider: None,
            subscriber: None,
            stats: None,
            reason: None,
            delay_ms: None,
        }
    }

    /// Attaches a request id.
    #[inline]
    pub fn with_request(mut self, id: RequestId) -> Self {
        self.request = Some(id);
        self
    }

    /// Attaches a request preference.
    #[inline]
    pub fn with_preference(mut self, preference: CorePreference) -> Self {
        self.preference = Some(preference);
        self
    }

    /// Attaches a provider id.
    #[inline]
    pub fn with_provider(mut self, provider: impl Into<Arc<str>>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Attaches a subscriber name.
    #[inline]
    pub fn with_subscriber(mut self, name: &'static str) -> Self {
        self.subscriber = Some(name);
        self
    }

    /// Attaches a statistics snapshot.
    #[inline]
    pub fn with_stats(mut self, stats: RequestStatistics) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_subscriber(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_subscriber(subscriber)
            .with_reason(info)
    }

    /// True for request registry transitions (created, fulfilled, released).
    #[inline]
    pub fn is_request_change(&self) -> bool {
        matches!(
            self.kind,
            EventKind::RequestCreated | EventKind::RequestFulfilled | EventKind::RequestReleased
        )
    }

    /// True for provider registry changes.
    #[inline]
    pub fn is_provider_change(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ProviderAdded | EventKind::ProviderRemoved
        )
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_increases() {
        let a = Event::new(EventKind::RequestCreated);
        let b = Event::new(EventKind::RequestCreated);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates_at_u32() {
        let ev = Event::new(EventKind::ProviderFailed).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }

    #[test]
    fn classification() {
        assert!(Event::new(EventKind::RequestReleased).is_request_change());
        assert!(!Event::new(EventKind::CoreObtained).is_request_change());
        assert!(Event::new(EventKind::ProviderRemoved).is_provider_change());
        assert!(Event::subscriber_overflow("log", "full").is_subscriber_overflow());
        assert!(Event::subscriber_panicked("log", "boom".into()).is_subscriber_panic());
    }

    #[test]
    fn subscriber_events_name_the_subscriber_not_a_provider() {
        let ev = Event::subscriber_overflow("log", "full");
        assert_eq!(ev.subscriber, Some("log"));
        assert_eq!(ev.provider, None);
        assert_eq!(ev.reason.as_deref(), Some("full"));

        let ev = Event::subscriber_panicked("log", "boom".into());
        assert_eq!(ev.subscriber, Some("log"));
        assert_eq!(ev.provider, None);
    }
}
