//! Backoff retry policy for transient failures

use atrium_core::config::ClientConfig;
use std::time::Duration;

/// Bounded exponential backoff: `base_delay * 2^(retry - 1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of backoff retries per request
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Whether another retry is allowed after `retries_so_far`
    pub fn allows(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }
}
