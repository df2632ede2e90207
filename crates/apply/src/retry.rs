//! Exponential backoff for transient client failures.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::{error, warn};
use tsop_kubehub::ClientError;

/// How many times a single apply call is attempted, and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(5) }
    }
}

impl RetryPolicy {
    /// Defaults overridden by `TSOP_APPLY_RETRIES` and `TSOP_RETRY_BASE_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let attempts = std::env::var("TSOP_APPLY_RETRIES").ok().and_then(|s| s.parse::<u32>().ok()).unwrap_or(d.attempts);
        let base_delay = std::env::var("TSOP_RETRY_BASE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(d.base_delay);
        Self { attempts, base_delay, ..d }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self { Self { attempts: 1, base_delay: Duration::ZERO, max_delay: Duration::ZERO } }

    /// Delay after failed attempt number `attempt` (1-based): base, 2x base, 4x base, ... capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or attempts run out.
    pub async fn run<F, Fut, T>(&self, kind: &'static str, name: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let max = self.attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < max => {
                    let delay = self.delay_for(attempt);
                    counter!("apply_retry_total", 1u64, "kind" => kind);
                    warn!(kind, name, attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient failure; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        error!(kind, name, attempt, error = %e, "giving up after max attempts");
                    }
                    return Err(e);
                }
            }
        }
    }
}
