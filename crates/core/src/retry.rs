//! Exponential backoff for broker operations.
//!
//! `retry_with_backoff` drives a bounded number of attempts of an async
//! operation; `Backoff` produces the delay sequence on its own for loops that
//! decide for themselves when to stop (reconnecting, for example).

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

/// Classifies errors as transient (worth another attempt) or permanent.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Delay sequence for a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: Duration::from_millis(config.initial_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier.max(1.0),
        }
    }

    /// Returns the delay to wait now and advances to the following one.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next.min(self.max);
        self.next = Duration::from_secs_f64(current.as_secs_f64() * self.multiplier).min(self.max);
        current
    }

    pub fn reset(&mut self, config: &RetryConfig) {
        *self = Self::new(config);
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` attempts have been made (0 means no limit).
///
/// Returns the last error together with the number of attempts made.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempts = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                let exhausted = config.max_attempts != 0 && attempt >= config.max_attempts;
                if !e.is_retryable() || exhausted {
                    tracing::error!(
                        operation = operation_name,
                        error = %e,
                        attempts = attempt,
                        retryable = e.is_retryable(),
                        "Operation failed, giving up"
                    );
                    return Err((e, attempt));
                }

                let delay = backoff.next_delay();
                tracing::warn!(
                    operation = operation_name,
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient"),
                TestError::Permanent => write!(f, "permanent"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 4,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(&RetryConfig {
            max_attempts: 0,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_multiplier: 2.0,
        });
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
    }

    #[test]
    fn test_backoff_reset() {
        let config = fast_config(3);
        let mut backoff = Backoff::new(&config);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset(&config);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_config(5), "test", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        tokio_test::assert_ok!(&result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_config(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Transient) }
        })
        .await;

        let (_, attempts) = result.unwrap_err();
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_config(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Permanent) }
        })
        .await;

        assert!(matches!(result, Err((TestError::Permanent, 1))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
