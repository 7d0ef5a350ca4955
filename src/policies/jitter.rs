//! # Jitter for retry delays.
//!
//! Several fulfillers (or pools) that watch the same flaky agent would otherwise
//! retry it at exactly the same moment.

use rand::Rng;
use std::time::Duration;

/// Randomization applied to a backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Exact delay. Predictable, useful in tests.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay/2` plus uniform in `[0, delay/2]`.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let floor = match self {
            JitterPolicy::None => return delay,
            JitterPolicy::Full => 0,
            JitterPolicy::Equal => ms / 2,
        };
        if floor >= ms {
            return Duration::from_millis(ms);
        }
        Duration::from_millis(rand::rng().random_range(floor..=ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let d = Duration::from_micros(1_234_567);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn test_full_bounds() {
        for _ in 0..100 {
            assert!(JitterPolicy::Full.apply(Duration::from_millis(40)) <= Duration::from_millis(40));
        }
    }

    #[test]
    fn test_zero_delay() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }
}
