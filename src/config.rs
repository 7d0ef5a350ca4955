//! # Worker pool configuration.
//!
//! Provides [`Config`], the settings shared by the request registry, both fulfillers
//! and the [`WorkerPool`](crate::WorkerPool) that wires them together.
//!
//! ## Sentinel values
//! - `remote_delay = 0s` → local providers serve `PreferRemote` requests immediately
//! - `grace = 0s` → `WorkerPool::shutdown` does not wait for the fulfillers
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Configuration for a worker pool and its fulfillers.
///
/// ## Field semantics
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `grace`: maximum wait for the fulfillers to stop on shutdown
/// - `remote_delay`: how long a `PreferRemote` request waits before a local provider may take it
/// - `obtainment_headroom`: extra cores the multi-source fulfiller obtains ahead of demand
/// - `provider_backoff`: retry delay after a provider returned an error
///
/// All fields are public. Prefer the helper accessors over checking sentinels inline.
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Receivers that lag behind more than `bus_capacity` messages observe `Lagged`.
    /// Fulfillers tolerate lag (they rescan), user subscribers lose the skipped events.
    pub bus_capacity: usize,

    /// Maximum time `WorkerPool::shutdown` waits for its fulfillers.
    ///
    /// If exceeded, shutdown returns `RuntimeError::GraceExceeded`.
    pub grace: Duration,

    /// Head start given to remote providers for `PreferRemote` requests.
    ///
    /// - `Duration::ZERO` = disabled, every compatible provider may serve immediately
    /// - `> 0` = a local provider only serves such a request once it is this old
    pub remote_delay: Duration,

    /// Number of cores obtained beyond current demand by the multi-source fulfiller.
    ///
    /// Remote cores take a while to allocate; keeping a few in flight hides that latency.
    /// Only applied while there is demand, an idle pool obtains nothing.
    pub obtainment_headroom: usize,

    /// Delay policy applied after a provider error, indexed by consecutive failures.
    pub provider_backoff: BackoffPolicy,
}

impl Config {
    /// Returns the remote head start as an `Option`.
    ///
    /// - `None` → disabled
    /// - `Some(d)` → local providers defer `PreferRemote` requests younger than `d`
    #[inline]
    pub fn remote_delay(&self) -> Option<Duration> {
        if self.remote_delay == Duration::ZERO {
            None
        } else {
            Some(self.remote_delay)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `grace = 30s`
    /// - `remote_delay = 0s` (disabled)
    /// - `obtainment_headroom = 3`
    /// - `provider_backoff = BackoffPolicy::default()`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            grace: Duration::from_secs(30),
            remote_delay: Duration::ZERO,
            obtainment_headroom: 3,
            provider_backoff: BackoffPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels() {
        let mut cfg = Config::default();
        assert_eq!(cfg.remote_delay(), None);
        cfg.remote_delay = Duration::from_millis(250);
        assert_eq!(cfg.remote_delay(), Some(Duration::from_millis(250)));

        cfg.bus_capacity = 0;
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
