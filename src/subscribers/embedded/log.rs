//! # LogWriter: events rendered through `tracing`
//!
//! A minimal subscriber that turns every [`Event`] into one `tracing` record under the
//! `corevisor::events` target. Install any `tracing` subscriber to see them.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO corevisor::events: request created request=#4 preference=PreferRemote unfulfilled=3 fulfilled=1
//! INFO corevisor::events: core obtained provider="agent-7"
//! WARN corevisor::events: dying core discarded provider="agent-7"
//! INFO corevisor::events: request fulfilled request=#4 provider="agent-7" unfulfilled=2 fulfilled=2
//! ```

use async_trait::async_trait;
use tracing::{info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "corevisor::events";

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let provider = e.provider.as_deref().unwrap_or("-");
        let subscriber = e.subscriber.unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        let request = e.request.map(|id| id.to_string());
        let request = request.as_deref().unwrap_or("-");
        let (unfulfilled, fulfilled) = e
            .stats
            .map(|s| (s.unfulfilled(), s.fulfilled()))
            .unwrap_or_default();

        match e.kind {
            EventKind::RequestCreated => info!(
                target: TARGET,
                request, preference = ?e.preference, unfulfilled, fulfilled,
                "request created"
            ),
            EventKind::RequestFulfilled => info!(
                target: TARGET,
                request, provider, unfulfilled, fulfilled,
                "request fulfilled"
            ),
            EventKind::RequestReleased => info!(
                target: TARGET,
                request, state = reason, unfulfilled, fulfilled,
                "request released"
            ),
            EventKind::ProviderAdded => info!(target: TARGET, provider, "provider added"),
            EventKind::ProviderRemoved => info!(target: TARGET, provider, "provider removed"),
            EventKind::ObtainmentStarted => info!(target: TARGET, provider, "obtainment started"),
            EventKind::CoreObtained => info!(target: TARGET, provider, "core obtained"),
            EventKind::ObtainmentCancelled => {
                info!(target: TARGET, provider, "obtainment cancelled")
            }
            EventKind::DyingCoreDiscarded => {
                warn!(target: TARGET, provider, "dying core discarded")
            }
            EventKind::ProviderFailed => warn!(
                target: TARGET,
                provider, err = reason, retry_ms = e.delay_ms.unwrap_or(0),
                "provider failed"
            ),
            EventKind::FulfillerStarted => info!(target: TARGET, fulfiller = reason, "fulfiller started"),
            EventKind::FulfillerStopped => info!(target: TARGET, fulfiller = reason, "fulfiller stopped"),
            EventKind::SubscriberOverflow => warn!(
                target: TARGET,
                subscriber, reason,
                "subscriber overflow"
            ),
            EventKind::SubscriberPanicked => warn!(
                target: TARGET,
                subscriber, info = reason,
                "subscriber panicked"
            ),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
