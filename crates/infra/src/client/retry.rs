//! Retry policy for outbound ITSM calls.

use std::time::Duration;

/// Bounded exponential backoff.
///
/// A call is attempted at most `max_retries + 1` times. The wait before retry
/// `n` (0-based) is `wait_min * 2^n`, capped at `wait_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub wait_min: Duration,
    pub wait_max: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            wait_min: Duration::from_secs(1),
            wait_max: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(wait_min: Duration, wait_max: Duration, max_retries: u32) -> Self {
        Self {
            wait_min,
            wait_max,
            max_retries,
        }
    }

    /// Policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2_u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.wait_min
            .checked_mul(factor)
            .unwrap_or(self.wait_max)
            .min(self.wait_max)
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(16));
        assert_eq!(policy.backoff(5), Duration::from_secs(30));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn attempts_are_bounded_by_max_retries() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::ZERO, 2);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_capped(
            min_ms in 0u64..5_000,
            extra_ms in 0u64..60_000,
            retry in 0u32..64,
        ) {
            let policy = RetryPolicy::new(
                Duration::from_millis(min_ms),
                Duration::from_millis(min_ms + extra_ms),
                5,
            );
            let current = policy.backoff(retry);
            let next = policy.backoff(retry + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= policy.wait_max);
            prop_assert!(policy.backoff(0) == policy.wait_min.min(policy.wait_max));
        }
    }
}
