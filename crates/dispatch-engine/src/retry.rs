//! Bounded retry with a fixed delay between attempts.
//!
//! Used for approvals, deposits and any other single fallible async action.
//! Every attempt re-invokes the operation closure, so state read inside the
//! closure (such as the active upstream) is fresh on each attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Default number of attempts per operation.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(2000);

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    max_attempts: u32,
    /// Delay between a failed attempt and the next one.
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_DELAY)
    }
}

impl RetryPolicy {
    /// A policy of `max_attempts` (clamped to at least 1) spaced by `delay`.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op` until it succeeds or the attempts are used up.
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with(operation, op, |_, _| {}).await
    }

    /// Like [`run`](Self::run), calling `on_failure` with the 1-based attempt
    /// number after every failed attempt, before the delay.
    ///
    /// Errors that are not [retryable](EngineError::is_retryable) end the loop
    /// immediately and are returned as is.
    pub async fn run_with<T, F, Fut, H>(
        &self,
        operation: &str,
        mut op: F,
        mut on_failure: H,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        H: FnMut(u32, &EngineError),
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            warn!(
                operation = %operation,
                attempt,
                max = self.max_attempts,
                error = %err,
                "Attempt failed"
            );
            on_failure(attempt, &err);

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                return Err(EngineError::ExhaustedRetry {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            debug!(
                "Retrying {} in {:?} (attempt {}/{})",
                operation,
                self.delay,
                attempt + 1,
                self.max_attempts
            );
            sleep(self.delay).await;
        }
    }
}
