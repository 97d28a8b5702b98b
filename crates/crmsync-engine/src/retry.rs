//! Bounded retry with exponential backoff.
//!
//! Every remote call the engine makes goes through [`RetryPolicy::run`], so
//! there is exactly one place that decides how often and how long to wait.

use std::future::Future;
use std::time::Duration;

use crmsync_remote::{RemoteError, RemoteResult};
use tracing::{debug, warn};

/// Retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Builder: set the attempt budget (at least one).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Delay after the given number of consecutive failures.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_backoff.as_secs_f64();
        let multiplier = self.backoff_multiplier.powi(failures as i32 - 1);
        let delay = base * multiplier;
        let max = self.max_backoff.as_secs_f64();

        Duration::from_secs_f64(delay.min(max))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut failures = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if failures > 0 {
                        debug!(operation, attempts = failures + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    failures += 1;
                    if failures >= self.max_attempts {
                        warn!(operation, attempts = failures, error = %e, "retries exhausted");
                        return Err(e);
                    }
                    let delay = self.backoff_delay(failures);
                    debug!(
                        operation,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Bounds a remote call by `limit`; an elapsed timer is a network error.
pub async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = RemoteResult<T>>,
) -> RemoteResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::network(format!(
            "request timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
