//! Retry with exponential backoff for upstream calls
//!
//! Only [`InvestoError::UpstreamUnavailable`] is retried. Anything else (bad
//! payloads, unknown symbols, configuration problems) fails on the first
//! attempt.

use crate::error::{InvestoError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// Delay before the given retry (1-based); zero for the first attempt
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let backoff_ms = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi((retry - 1) as i32);

        Duration::from_millis(backoff_ms as u64).min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(operation = operation_name, attempt, "Calling upstream");

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            retries = attempt - 1,
                            "Upstream call recovered"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(operation = operation_name, error = %err, "Non-retryable failure");
                    return Err(err);
                }
                Err(err) if attempt >= self.max_attempts => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "Giving up on upstream call"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let backoff = self.backoff_duration(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Upstream call failed, retrying in {:?}",
                        backoff
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

/// Bound `future` by `budget`, turning an elapsed deadline into `UpstreamUnavailable`
pub async fn with_timeout<T>(
    provider: &str,
    budget: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(budget, future).await {
        Ok(result) => result,
        Err(_) => Err(InvestoError::unavailable(
            provider,
            format!("timed out after {budget:?}"),
        )),
    }
}
