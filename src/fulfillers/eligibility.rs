//! Which pending requests a provider may serve, and when.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::Config;
use crate::cores::{CoreLocality, CorePreference};
use crate::requests::PendingRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Eligible,
    /// Compatible, but not before the given time has passed.
    Deferred(Duration),
    Incompatible,
}

impl Verdict {
    pub(crate) fn is_eligible(self) -> bool {
        matches!(self, Verdict::Eligible)
    }

    pub(crate) fn is_compatible(self) -> bool {
        !matches!(self, Verdict::Incompatible)
    }
}

/// Matching rules for the cores of one provider.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Eligibility {
    locality: CoreLocality,
    remote_delay: Option<Duration>,
}

impl Eligibility {
    pub(crate) fn new(locality: CoreLocality, cfg: &Config) -> Self {
        Self {
            locality,
            remote_delay: cfg.remote_delay(),
        }
    }

    pub(crate) fn locality(&self) -> CoreLocality {
        self.locality
    }

    pub(crate) fn judge(&self, request: &PendingRequest, now: Instant) -> Verdict {
        if !self.locality.can_serve(request.preference) {
            return Verdict::Incompatible;
        }
        if let (CoreLocality::Local, CorePreference::PreferRemote, Some(delay)) =
            (self.locality, request.preference, self.remote_delay)
        {
            let age = now.saturating_duration_since(request.requested_at);
            if age < delay {
                return Verdict::Deferred(delay - age);
            }
        }
        Verdict::Eligible
    }

    pub(crate) fn accepts(&self, request: &PendingRequest, now: Instant) -> bool {
        self.judge(request, now).is_eligible()
    }
}

/// Keeps the smaller of two optional delays.
pub(crate) fn earliest(current: Option<Duration>, candidate: Duration) -> Option<Duration> {
    Some(current.map_or(candidate, |c| c.min(candidate)))
}
