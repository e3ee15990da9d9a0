use crate::errors::ServiceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::once(Duration::from_millis(50))
    }
}

impl RetryConfig {
    /// One retry after `delay`.
    pub fn once(delay: Duration) -> Self {
        Self {
            max_attempts: 2,
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
        }
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries connection-level database failures and catalog I/O failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientPolicy;

impl RetryPolicy<ServiceError> for TransientPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_transient()
    }
}

/// Execute an async function with retries.
///
/// Every `operation` passed here must be a read or a whole transaction, so a
/// failed attempt leaves nothing behind.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(attempts, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    if attempts > 1 {
                        warn!(attempts, %error, "operation failed after retry");
                    }
                    return Err(error);
                }

                warn!(attempt = attempts, %error, ?delay, "transient failure, retrying");

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
