//! # Backoff policy for provider retries.
//!
//! [`BackoffPolicy`] controls how long a fulfiller leaves a failing provider alone.
//! The delay after `n` consecutive failures is `first × factor^(n-1)`, clamped to `max`,
//! then jittered. The base is derived from the failure count alone, so jitter never
//! feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use corevisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(1), Duration::from_millis(100));
//! assert_eq!(backoff.next(3), Duration::from_millis(400));
//! assert_eq!(backoff.next(20), Duration::from_secs(1));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth per additional failure (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 250ms`, `factor = 2.0`, `max = 10s`, `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(250),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay after `failures` consecutive failures.
    ///
    /// `0` and `1` both yield `first`. Overflowing or non-finite values clamp to `max`.
    pub fn next(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if secs.is_finite() && secs >= 0.0 && secs <= self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(base.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_first_failure_uses_first() {
        let policy = fixed(100, 30_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_growth() {
        let policy = fixed(100, 30_000, 2.0);
        assert_eq!(policy.next(2), Duration::from_millis(200));
        assert_eq!(policy.next(4), Duration::from_millis(800));
    }

    #[test]
    fn test_first_above_max_is_clamped() {
        let policy = fixed(5_000, 1_000, 2.0);
        assert_eq!(policy.next(1), Duration::from_secs(1));
    }

    #[test]
    fn test_overflow_clamps_to_max() {
        let policy = fixed(100, 10_000, 2.0);
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_equal_jitter_stays_within_half() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..fixed(1_000, 30_000, 1.0)
        };
        for failures in 1..50 {
            let delay = policy.next(failures);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1_000));
        }
    }
}
