use std::time::Duration;

use tracing::warn;

use crate::error::RetriesExhausted;

/// Doubling delay for retrying transient failures.
///
/// The first wait lasts `base`, each following one twice the previous,
/// until `max_retries` waits have been handed out.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_retries: u32,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max_retries,
            attempt: 0,
        }
    }

    /// Delay for the next attempt, or `None` once the cap is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let delay = self.base.saturating_mul(1u32 << self.attempt.min(31));
        self.attempt += 1;
        Some(delay)
    }

    /// Sleeps for the next delay.
    pub async fn wait(&mut self) -> Result<(), RetriesExhausted> {
        let delay = self
            .next_delay()
            .ok_or(RetriesExhausted(self.max_retries))?;
        warn!(
            attempt = self.attempt,
            max = self.max_retries,
            delay_ms = delay.as_millis() as u64,
            "retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Starts over from `base`, typically after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
