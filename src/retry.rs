//! Retry logic with exponential backoff
//!
//! Attempt 1 runs immediately. After a retryable failure of attempt `n`, the loop
//! waits `base_delay * 2^(n-1)` (capped at `max_delay`, optionally jittered) and runs
//! attempt `n + 1`. Non-retryable failures end the loop on first occurrence, and the
//! loop gives up once `max_retries + 1` attempts have failed.
//!
//! # Example
//!
//! ```no_run
//! use card_dl::retry::{IsRetryable, fetch_with_retry};
//! use card_dl::config::RetryConfig;
//! use card_dl::error::Cancelled;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Stopped,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! impl From<Cancelled> for MyError {
//!     fn from(_: Cancelled) -> Self {
//!         MyError::Stopped
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let report = fetch_with_retry(&config, &cancel, |_, _| {}, |_attempt| async {
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! report.result?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Cancelled, Error, ErrorClass};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Result of a retry loop together with the number of attempts it took
#[derive(Debug)]
pub struct RetryReport<T, E> {
    /// Final result: the first success, or the error that ended the loop
    pub result: Result<T, E>,
    /// Attempts actually started (never more than `max_retries + 1`)
    pub attempts: u32,
}

/// Backoff delay to wait after `failed_attempt` (1-based) fails
///
/// `base_delay * 2^(failed_attempt - 1)`, capped at `max_delay`. Jitter is not applied here.
pub fn backoff_delay(config: &RetryConfig, failed_attempt: u32) -> Duration {
    let exponent = failed_attempt.saturating_sub(1).min(31);
    config
        .base_delay
        .checked_mul(1u32 << exponent)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max retries, base delay, cap, jitter)
/// * `cancel` - Checked before every retry and raced against every backoff sleep
/// * `on_retry` - Called with `(next_attempt, delay)` before each backoff sleep
/// * `operation` - Called with the 1-based attempt number
///
/// Cancellation ends the loop with `E::from(Cancelled)`.
pub async fn fetch_with_retry<F, Fut, T, E, R>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut on_retry: R,
    mut operation: F,
) -> RetryReport<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display + From<Cancelled>,
    R: FnMut(u32, Duration),
{
    let max_attempts = config.max_retries.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return RetryReport {
                    result: Ok(result),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                if cancel.is_cancelled() {
                    return RetryReport {
                        result: Err(E::from(Cancelled)),
                        attempts: attempt,
                    };
                }

                let delay = backoff_delay(config, attempt);
                let delay = if config.jitter {
                    add_jitter(delay).min(config.max_delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                on_retry(attempt + 1, delay);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return RetryReport {
                            result: Err(E::from(Cancelled)),
                            attempts: attempt,
                        };
                    }
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed with non-retryable error"
                    );
                }
                return RetryReport {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
