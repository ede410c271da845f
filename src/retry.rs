//! Retry execution with pluggable classification and backoff.
//!
//! Wraps an async operation with bounded retries. Which errors retry, how
//! long to wait, and what happens on each retry are all injected; the
//! default classifier refuses validation, not-found, permission, and
//! authentication failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, ErrorKind};
use crate::models::{Backoff, RetryPolicy};

/// Decides whether an error is worth retrying.
pub type Classifier = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Callback invoked before each retry with the attempt number and error.
pub type OnRetry = Arc<dyn Fn(u32, &Error) + Send + Sync>;

/// Configuration for [`execute`].
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Hard cap applied on top of the backoff strategy.
    pub max_delay: Duration,
    /// Backoff strategy producing per-attempt delays.
    pub backoff: Arc<dyn Backoff>,
    /// Retry classifier.
    pub retry_if: Classifier,
    /// Optional per-retry callback.
    pub on_retry: Option<OnRetry>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_delay: Duration::from_secs(30),
            backoff: Arc::new(RetryPolicy::default()),
            retry_if: Arc::new(Error::is_retryable),
            on_retry: None,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn retry_if(mut self, classifier: Classifier) -> Self {
        self.retry_if = classifier;
        self
    }

    #[must_use]
    pub fn on_retry(mut self, callback: OnRetry) -> Self {
        self.on_retry = Some(callback);
        self
    }
}

/// Runs `operation` with retries per `config`.
///
/// Cancellation is cooperative: dropping the returned future (for example
/// under `tokio::time::timeout`) aborts promptly, including mid-backoff.
///
/// # Errors
///
/// Returns the first non-retryable error as-is, or the last error wrapped
/// with attempt metadata once attempts are exhausted.
pub async fn execute<T, F, Fut>(config: &RetryConfig, mut operation: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    if config.max_attempts == 0 {
        return Err(Error::configuration("max_attempts must be greater than 0"));
    }

    let mut last_err = None;
    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !(config.retry_if)(&err) {
                    return Err(err);
                }
                if attempt >= config.max_attempts {
                    last_err = Some(err);
                    break;
                }
                if let Some(on_retry) = &config.on_retry {
                    on_retry(attempt, &err);
                }
                let delay = config.backoff.delay(attempt).min(config.max_delay);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying operation"
                );
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
        }
    }

    let attempts = config.max_attempts;
    let err = last_err.unwrap_or_else(|| Error::internal("retry loop produced no error"));
    Err(
        Error::wrap(err, format!("operation failed after {attempts} attempts"))
            .with_kind(ErrorKind::Internal)
            .with_metadata("attempts", attempts),
    )
}
