//! HTTP utilities with retry logic
//!
//! Provides exponential backoff that defers to a provider-specified wait when the
//! server sends one (HTTP `Retry-After` header or a "try again in 1.5s" message).

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use tracing::{debug, warn};

static TRY_AGAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)try again in (\d+(?:\.\d+)?)\s*(ms|s)").expect("valid try-again regex")
});

static RETRY_AFTER_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry-after:\s*(\d+(?:\.\d+)?)").expect("valid retry-after regex")
});

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    /// Transient failures (rate limits, 5xx, connection problems)
    fn is_retryable(&self) -> bool;

    /// Wait requested by the server, if it sent one
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier (exponential factor)
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 6,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt
    ///
    /// # Arguments
    /// * `attempt` - The attempt number (0-indexed)
    ///
    /// # Returns
    /// Duration to wait before next retry
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms.min(u64::MAX as f64) as u64);
        backoff.min(self.max_backoff)
    }

    /// Wait before the next attempt: the server's request wins over computed backoff
    pub fn wait_for<E: Retryable>(&self, error: &E, attempt: u32) -> Duration {
        error
            .retry_after()
            .unwrap_or_else(|| self.backoff_for_attempt(attempt))
    }
}

/// Execute an async function with exponential backoff retry
///
/// Non-retryable errors are returned immediately. After `max_retries` retries
/// the last error is returned.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Label used in log lines
/// * `operation` - The async operation to retry
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display + Retryable,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt + 1);
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_retries || !e.is_retryable() {
                    return Err(e);
                }

                let wait = config.wait_for(&e, attempt);
                warn!(
                    "{} failed (attempt {}): {}. Retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

/// Parse a wait out of a provider error message
///
/// Recognises "try again in 500ms", "try again in 1.5s" and "Retry-After: 2".
pub fn parse_retry_after_message(message: &str) -> Option<Duration> {
    if let Some(caps) = TRY_AGAIN_RE.captures(message) {
        let value: f64 = caps[1].parse().ok()?;
        let secs = if caps[2].eq_ignore_ascii_case("ms") {
            value / 1000.0
        } else {
            value
        };
        return seconds_to_duration(secs);
    }

    RETRY_AFTER_TEXT_RE
        .captures(message)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .and_then(seconds_to_duration)
}

/// Read a `Retry-After` header given in seconds
pub fn parse_retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(seconds_to_duration)
}

/// Server waits longer than a day are treated as garbage
fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && (0.0..=86_400.0).contains(&secs) {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
        wait: Option<Duration>,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }

        fn retry_after(&self) -> Option<Duration> {
            self.wait
        }
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_retry_config_backoff() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff_for_attempt(0), Duration::from_millis(250));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(500));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(config.backoff_for_attempt(8), Duration::from_secs(8));
    }

    #[test]
    fn test_server_wait_overrides_backoff() {
        let config = RetryConfig::default();
        let err = TestError {
            retryable: true,
            wait: Some(Duration::from_secs(20)),
        };
        assert_eq!(config.wait_for(&err, 0), Duration::from_secs(20));

        let err = TestError {
            retryable: true,
            wait: None,
        };
        assert_eq!(config.wait_for(&err, 1), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_retry_after_message() {
        assert_eq!(
            parse_retry_after_message("Rate limit reached. Please try again in 500ms."),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            parse_retry_after_message("Please try again in 1.5s"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            parse_retry_after_message("Retry-After: 2"),
            Some(Duration::from_secs(2))
        );
        assert_eq!(parse_retry_after_message("quota exhausted"), None);
    }

    #[test]
    fn test_parse_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_header(&headers), None);
        headers.insert(RETRY_AFTER, "3".parse().unwrap());
        assert_eq!(parse_retry_after_header(&headers), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, TestError> = with_retry(&fast_config(3), "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(TestError {
                    retryable: true,
                    wait: None,
                })
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_is_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> = with_retry(&fast_config(2), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError {
                retryable: true,
                wait: Some(Duration::from_millis(1)),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> = with_retry(&fast_config(5), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError {
                retryable: false,
                wait: None,
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
