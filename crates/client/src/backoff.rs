//! Reconnect backoff math.
//!
//! Kept free of any runtime so the delay sequence can be tested directly.

use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential backoff state owned by the transport manager.
///
/// `attempt` counts retries scheduled since the last confirmed open. There is
/// no attempt limit: the feed retries for as long as the session lives.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    attempt: u32,
    config: RetryConfig,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { attempt: 0, config }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget previous failures. Called when the stream is confirmed open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// `min(base * 2^attempt, max)`, saturating instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_delay.as_millis() as u64;
        let max_ms = self.config.max_delay.as_millis() as u64;
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay for the retry being scheduled now, then advance the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}
