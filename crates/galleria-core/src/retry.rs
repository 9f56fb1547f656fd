//! Retry policy for transient remote failures.

use std::future::Future;
use std::time::Duration;

use crate::Result;

/// Exponential backoff policy.
///
/// Only errors classified as transient by [`crate::Error::is_transient`] are
/// retried; definitive failures return immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut current = 1;
        loop {
            match attempt(current).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && current < max_attempts => {
                    let delay = self.delay_for(current);
                    tracing::warn!(
                        operation,
                        attempt = current,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    current += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
