//! Reconnect schedule for status stream clients
//!
//! The delay for attempt `n` (zero based) is `min(base * 2^n, max)` plus a
//! random jitter of up to `jitter_ratio` of that delay. Clients give up after
//! `max_attempts` consecutive failures; the server keeps no subscription state,
//! so a reconnecting client simply resends its id list and scope.

use rand::Rng;
use std::time::Duration;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default number of consecutive attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default jitter as a fraction of the computed delay.
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub jitter_ratio: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt`, without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Delay before attempt `attempt`, with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        let max_jitter = (base.as_millis() as f64 * self.jitter_ratio.max(0.0)) as u64;
        if max_jitter == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
        base + Duration::from_millis(jitter)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.base_delay_for(4), Duration::from_millis(16_000));
        assert_eq!(policy.base_delay_for(5), Duration::from_millis(30_000));
        assert_eq!(policy.base_delay_for(63), Duration::from_millis(30_000));
        assert_eq!(policy.base_delay_for(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_no_jitter_is_deterministic() {
        let policy = ReconnectPolicy {
            jitter_ratio: 0.0,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for(2), Duration::from_millis(4_000));
    }

    #[test]
    fn test_retry_budget() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_bounds(attempt in 0u32..100) {
            let policy = ReconnectPolicy::default();
            let base = policy.base_delay_for(attempt);
            let delay = policy.delay_for(attempt);
            prop_assert!(delay >= base);
            prop_assert!(delay.as_millis() as f64 <= base.as_millis() as f64 * 1.2 + 1.0);
        }
    }
}
