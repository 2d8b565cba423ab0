//! Bounded exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
/// Default delay ceiling.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
/// Default number of failed attempts before a sequence gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Retry timing for one attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Failed attempts after which the sequence gives up.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            max: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    #[must_use]
    pub const fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    ///
    /// `min(base * 2^(attempt - 1), max)`. Attempt 0 is treated as 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Whether `failed_attempts` consecutive failures end the sequence.
    #[must_use]
    pub const fn is_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|k| policy.delay_for(k).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60]);
    }

    #[test]
    fn test_monotonic_until_cap() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(10), 50);
        let mut previous = Duration::ZERO;
        for attempt in 1..=50 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            assert!(delay <= policy.max);
            previous = delay;
        }
        assert_eq!(previous, policy.max);
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), policy.max);
        assert_eq!(policy.delay_for(0), policy.base);
    }

    #[test]
    fn test_exhaustion() {
        let policy = BackoffPolicy::default();
        assert!(!policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
    }
}
