//! Per-stage retry configuration.

use std::time::Duration;

/// Retry policy applied to each stage.
#[derive(Debug, Clone)]
pub struct StageRetry {
    /// Maximum attempts per stage (including the first).
    pub max_attempts: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for StageRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl StageRetry {
    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base backoff delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Backoff delay before retrying after `failed_attempts` failures.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let retry = StageRetry::default();
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let retry = StageRetry::default();
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(8));
    }

    #[test]
    fn test_at_least_one_attempt() {
        let retry = StageRetry::default().with_max_attempts(0);
        assert_eq!(retry.max_attempts, 1);
    }
}
