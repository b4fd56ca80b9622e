use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use shared_config::TelehealthSettings;

use crate::error::TelehealthError;

/// Bounded exponential backoff with jitter for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &TelehealthSettings) -> Self {
        Self {
            max_attempts: settings.lookup_retry_max_attempts.max(1),
            base_delay: Duration::from_millis(settings.lookup_retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.lookup_retry_max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based), never above `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(16);
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let capped = base_ms.saturating_mul(1u64 << pow).min(max_ms);

        let jitter = if capped == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=capped / 2)
        };

        Duration::from_millis(capped.saturating_add(jitter).min(max_ms))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Returns the last error and the attempts spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, (TelehealthError, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TelehealthError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!("{} attempt {} failed ({}), retrying in {:?}", label, attempt, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("{} gave up after {} attempts: {}", label, attempt, e);
                    }
                    return Err((e, attempt));
                }
            }
        }
    }
}
