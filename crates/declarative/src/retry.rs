//! Retry logic with exponential backoff for transient provider errors.

use crate::error::ProviderError;
use crate::types::RetryConfig;
use std::thread;
use std::time::Duration;

/// Callback trait for retry notifications.
pub trait RetryCallback {
    /// Called before sleeping ahead of another attempt.
    ///
    /// # Arguments
    /// * `attempt` - The attempt that just failed (1-indexed)
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, error: &ProviderError, delay: Duration);
}

/// No-op callback.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _error: &ProviderError, _delay: Duration) {}
}

/// Outcome of a retried operation
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ProviderError>,
    /// Number of times the operation ran
    pub attempts: u32,
}

/// Execute an operation, retrying retryable errors with exponential backoff.
///
/// The operation receives the 1-indexed attempt number. Non-retryable errors
/// are returned immediately; the last error is returned once the attempt
/// budget is spent.
pub fn with_retry<T, F>(config: &RetryConfig, callback: &dyn RetryCallback, mut operation: F) -> Attempted<T>
where
    F: FnMut(u32) -> Result<T, ProviderError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt) {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                };
            }
            Err(e) => {
                let delay = config.delay_for_attempt(attempt - 1);
                callback.on_retry(attempt, &e, delay);
                thread::sleep(delay);
            }
        }
    }
}
