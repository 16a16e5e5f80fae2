//! Bounded retry with a fixed delay between attempts.
//!
//! The web client renders asynchronously, so most interactions are attempted
//! several times before giving up. Every such loop goes through
//! [`RetryPolicy::run`]: a fixed attempt ceiling, a fixed pause, and a
//! predicate deciding which errors are worth another attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: Error },
    /// An attempt failed with an error the predicate refused to retry.
    Aborted(Error),
}

impl RetryError {
    pub fn into_inner(self) -> Error {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(e) => e,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached. `op` receives the zero-based attempt index.
    /// No delay follows the final attempt.
    pub async fn run<T, F, Fut, P>(
        &self,
        label: &str,
        retryable: P,
        mut op: F,
    ) -> std::result::Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = crate::Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation = label, attempt = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !retryable(&e) => {
                    debug!(operation = label, error = %e, "Non-retryable failure");
                    return Err(RetryError::Aborted(e));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        warn!(operation = label, attempts = attempt, error = %e, "Retry ceiling reached");
                        return Err(RetryError::Exhausted { attempts: attempt, last: e });
                    }
                    debug!(
                        operation = label,
                        attempt,
                        max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }
}
