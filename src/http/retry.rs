//! Retry with backoff for connector calls
//!
//! The operation closure is invoked afresh on every attempt, so anything it
//! builds (request signatures in particular) is regenerated per attempt.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Initial backoff for transport failures
    pub initial_backoff: Duration,

    /// Upper bound for any single sleep, including Retry-After values
    pub max_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential backoff)
    pub multiplier: f64,

    /// Add random jitter to transport-failure backoff
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_rate_limited()
    }
}

impl RetryConfig {
    /// Helpdesk APIs: five attempts, long ceiling for Retry-After
    pub fn for_rate_limited() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Short sleeps, for tests against local mock servers
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Calculate backoff duration after a given failed attempt (0-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let final_duration = if self.jitter {
            // Add 0-25% jitter
            capped * (1.0 + rand::thread_rng().gen_range(0.0..0.25))
        } else {
            capped
        };

        Duration::from_secs_f64(final_duration)
    }
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with exponential backoff
    Retry,
    /// Retry after a specific duration (e.g., from Retry-After header)
    RetryAfter(Duration),
    /// Don't retry, the error is permanent
    NoRetry,
}

/// Trait for errors that can indicate whether to retry
pub trait RetryableError {
    fn retry_decision(&self) -> RetryDecision;
}

/// Execute an async operation with retry logic
///
/// Returns the first success, the first non-retryable error, or the last
/// retryable error once `max_attempts` is spent.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let decision = e.retry_decision();
                attempt += 1;

                let backoff = match decision {
                    RetryDecision::NoRetry => {
                        debug!(
                            operation = operation_name,
                            attempt, "Operation failed with non-retryable error: {}", e
                        );
                        return Err(e);
                    }
                    RetryDecision::RetryAfter(d) => d.min(config.max_backoff),
                    RetryDecision::Retry => config.backoff_duration(attempt - 1),
                };

                if attempt >= config.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        "Operation failed after {} attempts: {}",
                        attempt,
                        e
                    );
                    return Err(e);
                }

                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    backoff_secs = backoff.as_secs_f64(),
                    "Retrying after error: {}",
                    e
                );

                sleep(backoff).await;
            }
        }
    }
}
