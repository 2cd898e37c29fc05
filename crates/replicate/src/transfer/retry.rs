//! Bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::ReplicationConfig;
use crate::error::{ErrorKind, ReplicateError, Result};

/// Retry budget for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReplicationConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// budget is spent. `on_retry` is called once per retry taken.
    ///
    /// Cancellation is checked before each attempt and interrupts the backoff
    /// sleep; an attempt already running is allowed to finish.
    pub async fn run<T, F, Fut, R>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut on_retry: R,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        R: FnMut(),
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ReplicateError::Cancelled);
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !is_retryable(&err) || attempt >= self.max_retries {
                return Err(err);
            }

            attempt += 1;
            let delay = self.delay_for(attempt);
            warn!(
                "{} failed, retry {}/{} in {:?}: {}",
                what, attempt, self.max_retries, delay, err
            );
            on_retry();

            tokio::select! {
                _ = cancel.cancelled() => return Err(ReplicateError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Configuration mistakes, undecodable values and cancellation do not go
/// away on retry.
fn is_retryable(err: &ReplicateError) -> bool {
    !matches!(
        err.kind(),
        ErrorKind::Config | ErrorKind::Decode | ErrorKind::Cancelled
    )
}
