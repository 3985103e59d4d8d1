// src/retry.rs
use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::store::StoreError;

/// Bounded, jittered exponential backoff for storage transactions that lost a
/// serialization race. Only [`StoreError::is_retryable`] errors are replayed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    pub fn with_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);

        let spread = (delay as f64 * self.jitter_pct) as i64;
        let delay = if spread > 0 {
            delay.saturating_add_signed(rand::thread_rng().gen_range(-spread..=spread))
        } else {
            delay
        };
        Duration::from_millis(delay)
    }

    pub async fn run<F, Fut, T>(&self, operation: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!(operation, attempt, %err, "giving up after conflicts");
                        return Err(err);
                    }
                    let delay = self.next_delay(attempt - 1);
                    warn!(operation, attempt, ?delay, %err, "retrying after conflict");
                    sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 10, 200, 0.2)
    }
}
