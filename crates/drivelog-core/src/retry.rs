//! Retry logic for location acquisition.
//!
//! This module provides configurable retry functionality for handling
//! transient location failures, mainly one-shot fixes that time out while
//! the GPS is still converging.
//!
//! # Example
//!
//! ```
//! use drivelog_core::{Error, RetryConfig, with_retry};
//!
//! # async fn example() -> Result<(), Error> {
//! // Three attempts in total, half a second apart
//! let config = RetryConfig::for_end_location(3, std::time::Duration::from_millis(500));
//!
//! let result = with_retry(&config, "end_location", || async {
//!     // Your location request here
//!     Ok::<_, Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries).
    pub max_retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryConfig {
    /// Retry configuration for the end-of-drive location.
    ///
    /// `max_attempts` counts the first try, so `3` means up to two retries.
    /// The delay stays constant: the vehicle has stopped and waiting longer
    /// rarely helps the fix converge faster.
    pub fn for_end_location(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_retries: max_attempts.saturating_sub(1),
            delay,
        }
    }

    /// Total number of attempts, including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Execute an async operation with retry logic.
///
/// Only errors for which [`Error::is_retryable`] holds are retried; any other
/// error is returned immediately.
///
/// # Returns
///
/// The result of the operation, or the last error if all retries failed.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }

                last_error = Some(e);

                if attempt < config.max_retries {
                    let delay = config.delay;
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}",
                        operation_name,
                        attempt + 1,
                        config.max_retries + 1,
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::unavailable("operation failed with no error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use drivelog_types::AuthorizationState;

    #[test]
    fn test_end_location_preset_counts_first_attempt() {
        let config = RetryConfig::for_end_location(3, Duration::from_millis(500));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.attempts(), 3);
        assert_eq!(config.delay, Duration::from_millis(500));

        assert_eq!(RetryConfig::for_end_location(0, Duration::ZERO).attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_waits_between_attempts() {
        let config = RetryConfig::for_end_location(3, Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let result: Result<i32> = with_retry(&config, "test", || async {
            Err::<i32, _>(Error::timeout("fix", Duration::from_secs(5)))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventual_success() {
        let config = RetryConfig::for_end_location(3, Duration::from_millis(10));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<i32> = with_retry(&config, "test", || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(Error::timeout("fix", Duration::from_secs(5)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_all_fail() {
        let config = RetryConfig::for_end_location(3, Duration::from_millis(10));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<i32> = with_retry(&config, "test", || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::timeout("fix", Duration::from_secs(5)))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_error() {
        let config = RetryConfig::for_end_location(4, Duration::from_millis(10));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<i32> = with_retry(&config, "test", || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::PermissionDenied(AuthorizationState::Denied))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
