use std::future::Future;

use tracing::warn;

use crate::error::Result;

/// Retry policy shared by every retried call in the pipeline.
///
/// Delays double after each failed attempt, starting at `base_delay_ms`.
/// Only errors classified transient by `HarvestError::is_transient` are
/// retried; everything else returns immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt
    /// budget is exhausted.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay_ms = self.base_delay_ms;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(attempt, delay_ms, "{} failed, retrying: {}", label, e);
                    common::sleep_millis(delay_ms).await;
                    delay_ms = delay_ms.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
