//! Timeout and backoff wrapper for external service calls

use crate::error::ServiceError;
use std::future::Future;
use std::time::Duration;

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8_000;

/// Retry policy for one class of service call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    /// Policy without backoff delays (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
        }
    }
}

/// Run `operation` under a per-attempt timeout, retrying transient failures
///
/// Backoff starts at `initial_backoff` and doubles up to 8s. Non-transient
/// errors and the last transient error are returned as-is.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(policy.timeout.as_secs())),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient service error, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_millis(MAX_BACKOFF_MS));
            }
            Err(err) => {
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Service call failed"
                );
                return Err(err);
            }
        }
    }
}
