//! Retry logic with exponential backoff

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (total attempts = max_retries + 1)
    pub max_retries: u32,

    /// Base delay before the first retry (milliseconds)
    pub base_delay_ms: u64,

    /// Maximum delay between retries (milliseconds)
    pub max_delay_ms: u64,

    /// Hard per-attempt deadline (milliseconds)
    pub timeout_ms: u64,

    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 5000,
            timeout_ms: 30000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Per-attempt deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Calculate the backoff delay before attempt `attempt` (1-indexed;
    /// attempt 0 never sleeps). Doubles per attempt, capped at
    /// `max_delay_ms`, with +/-25% jitter when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.base_delay_ms as f64 * 2f64.powi(attempt as i32 - 1);

        let jittered = if self.jitter {
            // 0.75 to 1.25
            let factor = 0.75 + rand::thread_rng().gen::<f64>() * 0.5;
            base_delay * factor
        } else {
            base_delay
        };

        Duration::from_millis(jittered.min(self.max_delay_ms as f64) as u64)
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    /// Should retry (transient error)
    Retry,

    /// Should not retry (permanent error)
    NoRetry,

    /// Rate limited - use provided delay if available
    RateLimited { retry_after_ms: Option<u64> },
}

/// Trait for errors that can be classified for retry
pub trait RetryableError {
    fn classify(&self) -> RetryClassification;
}

impl RetryableError for crate::error::Error {
    fn classify(&self) -> RetryClassification {
        use crate::error::Error;
        match self {
            Error::RateLimited(_) => RetryClassification::RateLimited {
                retry_after_ms: None,
            },
            e if e.is_retryable() => RetryClassification::Retry,
            _ => RetryClassification::NoRetry,
        }
    }
}

/// Execute an async operation with retry logic
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let classification = e.classify();

                match classification {
                    RetryClassification::NoRetry => {
                        debug!(
                            "{}: non-retryable error on attempt {}: {}",
                            operation_name,
                            attempt + 1,
                            e
                        );
                        return Err(e);
                    }
                    RetryClassification::Retry | RetryClassification::RateLimited { .. } => {
                        if attempt >= config.max_retries {
                            warn!(
                                "{}: max retries ({}) exceeded: {}",
                                operation_name, config.max_retries, e
                            );
                            return Err(e);
                        }

                        let delay = match classification {
                            RetryClassification::RateLimited {
                                retry_after_ms: Some(ms),
                            } => Duration::from_millis(ms),
                            _ => config.delay_for_attempt(attempt + 1),
                        };

                        warn!(
                            "{}: attempt {} failed, retrying in {:?}: {}",
                            operation_name,
                            attempt + 1,
                            delay,
                            e
                        );

                        sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 5000);
        assert_eq!(config.timeout_ms, 30000);
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            base_delay_ms: 500,
            max_delay_ms: 5000,
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(5000)); // capped
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let delay = config.delay_for_attempt(1).as_millis() as u64;
            // 500ms +/- 25%
            assert!((375..=625).contains(&delay), "delay out of range: {}", delay);
        }
    }

    struct TestError {
        retryable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error")
        }
    }

    impl RetryableError for TestError {
        fn classify(&self) -> RetryClassification {
            if self.retryable {
                RetryClassification::Retry
            } else {
                RetryClassification::NoRetry
            }
        }
    }

    #[tokio::test]
    async fn test_with_retry_eventually_succeeds() {
        let config = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            jitter: false,
            ..Default::default()
        };

        let mut calls = 0;
        let result = with_retry(&config, "test", || {
            calls += 1;
            let ok = calls >= 2;
            async move {
                if ok {
                    Ok(42)
                } else {
                    Err(TestError { retryable: true })
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_with_retry_no_retry_on_permanent_error() {
        let config = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            jitter: false,
            ..Default::default()
        };

        let mut calls = 0;
        let result: Result<i32, _> = with_retry(&config, "test", || {
            calls += 1;
            async { Err(TestError { retryable: false }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
