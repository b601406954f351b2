//! Per-chunk retry with exponential backoff.

use std::time::Duration;

use ferry_protocol::constants::DEFAULT_MAX_RETRIES;

/// Retry budget and backoff curve for a single chunk.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first try; a chunk is tried at most `1 + max_retries` times.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculates the delay before retry number `attempt` (1-based),
    /// with ±25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / 1_000_000_000.0)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        Duration::from_secs_f64((capped + jitter * offset).max(0.0))
    }

    /// Total tries a chunk gets before the upload fails.
    pub fn max_tries(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
