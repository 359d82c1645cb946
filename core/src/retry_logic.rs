//! Backoff retry for decision-service calls.

use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimit,
    Auth,
    Timeout,
    ContextOverflow,
    Network,
    ServerError,
    Unknown,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        match self {
            FailureKind::RateLimit | FailureKind::Timeout | FailureKind::Network | FailureKind::ServerError => true,
            // A new key or a shorter history is needed; retrying cannot help.
            FailureKind::Auth | FailureKind::ContextOverflow => false,
            FailureKind::Unknown => false,
        }
    }
}

/// Buckets an error message by the substrings providers actually use.
pub fn classify_error(message: &str) -> FailureKind {
    let msg = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    if any(&["rate limit", "429", "too many requests", "quota exceeded"]) {
        FailureKind::RateLimit
    } else if any(&["unauthorized", "401", "403", "invalid api key", "authentication"]) {
        FailureKind::Auth
    } else if any(&["timeout", "timed out", "deadline exceeded"]) {
        FailureKind::Timeout
    } else if any(&["context length", "context window", "maximum context", "token limit"]) {
        FailureKind::ContextOverflow
    } else if any(&["connection", "network", "dns", "could not resolve"]) {
        FailureKind::Network
    } else if any(&["500", "502", "503", "504", "overloaded", "bad gateway"]) {
        FailureKind::ServerError
    } else {
        FailureKind::Unknown
    }
}

pub fn calculate_delay(config: &RetryConfig, attempt: usize) -> Duration {
    let millis = config.base_delay.as_millis() as f64 * config.backoff_multiplier.powi(attempt as i32);
    let clamped = millis.min(config.max_delay.as_millis() as f64);
    Duration::from_millis(clamped as u64)
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is used up. The last error is returned unchanged.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!("[Retry] {} succeeded on attempt {}", operation_name, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) => {
                let message = e.to_string();
                let kind = classify_error(&message);
                warn!(
                    "[Retry] {} failed (attempt {}/{}): {:?} - {}",
                    operation_name,
                    attempt + 1,
                    attempts,
                    kind,
                    message.chars().take(120).collect::<String>()
                );

                if !kind.is_retryable() || attempt + 1 >= attempts {
                    return Err(e);
                }

                let delay = calculate_delay(config, attempt);
                info!("[Retry] Waiting {}ms before retry", delay.as_millis());
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_classify_error() {
        assert_eq!(classify_error("HTTP 429 Too Many Requests"), FailureKind::RateLimit);
        assert_eq!(classify_error("Invalid API key"), FailureKind::Auth);
        assert_eq!(classify_error("operation timed out"), FailureKind::Timeout);
        assert_eq!(classify_error("maximum context length is 128000"), FailureKind::ContextOverflow);
        assert_eq!(classify_error("error sending request: connection refused"), FailureKind::Network);
        assert_eq!(classify_error("API error 503: overloaded"), FailureKind::ServerError);
        assert_eq!(classify_error("model refused"), FailureKind::Unknown);
    }

    #[test]
    fn test_calculate_delay() {
        let config = RetryConfig::default();
        assert_eq!(calculate_delay(&config, 0), Duration::from_millis(1000));
        assert_eq!(calculate_delay(&config, 2), Duration::from_millis(4000));
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(&fast(), "decide", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    anyhow::bail!("503 service unavailable")
                }
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn auth_errors_fail_fast() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry(&fast(), "decide", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("401 Unauthorized") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry(&fast(), "decide", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("connection reset") }
        })
        .await;
        assert!(result.unwrap_err().to_string().contains("connection reset"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
