//! # Exponential Backoff
//!
//! Retry pacing for the state-mutating writes of the pause and transform
//! phases. Delays start at the base and double per attempt up to the cap:
//! 100ms, 200ms, 400ms, 800ms, 1.6s, 3.2s, 5s (max) with the defaults.
//!
//! Only retryable errors (conflicts, throttling, server and transport
//! failures) are retried. Anything else is returned on the first attempt.

use crate::error::UpgradeError;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { current: base, max }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        result
    }
}

/// How often and how patiently a failed write is retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.base_delay, self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// exhausts `policy.max_retries`.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, UpgradeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpgradeError>>,
{
    let mut backoff = policy.backoff();
    let mut retries = 0u32;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                let delay = backoff.next_backoff();
                warn!(
                    operation = %operation_name,
                    retry = retries,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    error!(
                        operation = %operation_name,
                        attempts = retries + 1,
                        error = %e,
                        "Operation failed after max retries"
                    );
                }
                return Err(e);
            }
        }
    }
}
