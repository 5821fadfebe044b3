//! Retry policy for remote calls
//!
//! Only errors classified as retryable by [`DatastoreError::is_retryable`] are
//! repeated; everything else fails on the first attempt.

use crate::config::RetryConfig;
use crate::domain::DatastoreError;
use crate::log_retry_attempt;
use std::future::Future;
use std::time::Duration;

/// Bounded retry for datastore and job calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    delay: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts, retried immediately
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; values below 1 are raised to 1
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.delay_ms))
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Runs `call` until it succeeds, fails fatally or the budget runs out
    ///
    /// # Errors
    ///
    /// Returns the last error seen.
    ///
    /// # Examples
    ///
    /// ```
    /// use deid_export::core::retry::RetryPolicy;
    /// use deid_export::domain::DatastoreError;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let calls = AtomicUsize::new(0);
    /// let result = RetryPolicy::default()
    ///     .run("get_file", || async {
    ///         if calls.fetch_add(1, Ordering::SeqCst) == 0 {
    ///             Err(DatastoreError::Timeout("slow".to_string()))
    ///         } else {
    ///             Ok(42)
    ///         }
    ///     })
    ///     .await;
    /// assert_eq!(result.unwrap(), 42);
    /// assert_eq!(calls.load(Ordering::SeqCst), 2);
    /// # });
    /// ```
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, DatastoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatastoreError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    log_retry_attempt!(attempt, self.max_attempts, operation, e);
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::error!(
                            operation = operation,
                            attempts = attempt,
                            error = %e,
                            "Retry budget exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}
