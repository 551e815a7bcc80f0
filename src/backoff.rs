//! Retry backoff policy.
//!
//! Delays are randomized so concurrently-retrying batches spread out
//! instead of hitting the stream in lockstep. Each delay draws uniformly
//! from `[floor, prev * 3]` and is capped at the ceiling: a
//! roughly-tripling growth curve with jitter, not base-2 exponential.
//!
//! Millisecond conversions saturate to `u64::MAX` for very large
//! durations.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use streamsink::BackoffPolicy;
//!
//! let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1)).unwrap();
//! let next = policy.next_delay(policy.floor());
//! assert!(next >= Duration::from_millis(100));
//! assert!(next <= Duration::from_secs(1));
//! ```

use rand::{rng, Rng};
use std::time::Duration;

use crate::error::ConfigError;

/// Randomized, capped backoff for failed sends.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackoffPolicy {
    min: Duration,
    max: Duration,
}

impl BackoffPolicy {
    /// Create a policy with the given delay bounds.
    /// Returns an error if `min` is zero or exceeds `max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min.is_zero() {
            return Err(ConfigError::ZeroBackoffFloor);
        }
        if min > max {
            return Err(ConfigError::BackoffFloorAboveCeiling { min, max });
        }
        Ok(Self { min, max })
    }

    /// Smallest delay the policy produces; also the basis handed to the
    /// first attempt of every batch.
    pub fn floor(&self) -> Duration {
        self.min
    }

    pub fn ceiling(&self) -> Duration {
        self.max
    }

    /// Next delay after an attempt whose own wait was `prev`.
    ///
    /// Always `>= floor` once `prev >= floor`, always `<= ceiling`.
    pub fn next_delay(&self, prev: Duration) -> Duration {
        let mut rng = rng();
        self.next_delay_with_rng(prev, &mut rng)
    }

    /// Next delay with a caller-supplied RNG (for deterministic tests).
    pub fn next_delay_with_rng<R: Rng>(&self, prev: Duration, rng: &mut R) -> Duration {
        let min_ms = as_millis_saturated(self.min);
        let max_ms = as_millis_saturated(self.max);
        let prev_ms = as_millis_saturated(prev);

        // upper bound grows from the previous delay, capped by the ceiling
        let upper = prev_ms.saturating_mul(3).min(max_ms);
        // lower bound keeps the floor but never exceeds upper (tiny prev)
        let lower = min_ms.min(upper);

        Duration::from_millis(rng.random_range(lower..=upper))
    }
}

impl Default for BackoffPolicy {
    /// 100ms floor, 10s ceiling.
    fn default() -> Self {
        Self { min: Duration::from_millis(100), max: Duration::from_secs(10) }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy(min_ms: u64, max_ms: u64) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms)).unwrap()
    }

    #[test]
    fn stays_within_bounds_across_a_retry_chain() {
        let policy = policy(100, 1000);
        let mut prev = policy.floor();
        for _ in 0..200 {
            let next = policy.next_delay(prev);
            assert!(next >= Duration::from_millis(100));
            assert!(next <= Duration::from_millis(1000));
            prev = next;
        }
    }

    #[test]
    fn caps_at_ceiling_for_large_previous_delay() {
        let policy = policy(100, 1000);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let next = policy.next_delay_with_rng(Duration::from_secs(3600), &mut rng);
            assert!(next >= Duration::from_millis(100));
            assert!(next <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn grows_from_previous_delay() {
        let policy = policy(100, 100_000);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let next = policy.next_delay_with_rng(Duration::from_millis(200), &mut rng);
            assert!(next >= Duration::from_millis(100));
            assert!(next <= Duration::from_millis(600));
        }
    }

    #[test]
    fn deterministic_with_seeded_rng() {
        let policy = policy(100, 1000);
        let mut a = StdRng::seed_from_u64(9);
        let mut b = StdRng::seed_from_u64(9);
        assert_eq!(
            policy.next_delay_with_rng(Duration::from_millis(150), &mut a),
            policy.next_delay_with_rng(Duration::from_millis(150), &mut b),
        );
    }

    #[test]
    fn tiny_previous_delay_collapses_to_its_tripling() {
        let policy = policy(100, 1000);
        let mut rng = StdRng::seed_from_u64(3);
        let next = policy.next_delay_with_rng(Duration::from_millis(10), &mut rng);
        assert_eq!(next, Duration::from_millis(30));
    }

    #[test]
    fn rejects_zero_floor() {
        let err = BackoffPolicy::new(Duration::ZERO, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBackoffFloor);
    }

    #[test]
    fn rejects_floor_above_ceiling() {
        let err =
            BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ConfigError::BackoffFloorAboveCeiling { .. }));
    }

    #[test]
    fn default_bounds_are_valid() {
        let default = BackoffPolicy::default();
        assert!(BackoffPolicy::new(default.floor(), default.ceiling()).is_ok());
    }
}
