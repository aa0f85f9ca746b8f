//! Retry backoff for transient store conflicts

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

impl RetryConfig {
    /// Attempts allowed, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Exponential delay before retry number `attempt` (1-based), capped
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .base_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// [`base_delay`](Self::base_delay) plus up to half of it in random jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let half = base.as_millis() as u64 / 2;
        let jitter = if half == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half)
        };
        base + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            max_attempts: 4,
            base_backoff_ms: 10,
            max_backoff_ms: 50,
        }
    }

    #[test]
    fn test_exponential_and_capped() {
        let retry = config();
        assert_eq!(retry.base_delay(1), Duration::from_millis(10));
        assert_eq!(retry.base_delay(2), Duration::from_millis(20));
        assert_eq!(retry.base_delay(3), Duration::from_millis(40));
        assert_eq!(retry.base_delay(4), Duration::from_millis(50));
        assert_eq!(retry.base_delay(60), Duration::from_millis(50));
    }

    #[test]
    fn test_jitter_bounds() {
        let retry = config();
        for _ in 0..100 {
            let d = retry.backoff(2);
            assert!(d >= Duration::from_millis(20) && d <= Duration::from_millis(30));
        }
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let retry = RetryConfig {
            max_attempts: 0,
            ..config()
        };
        assert_eq!(retry.attempts(), 1);
    }
}
