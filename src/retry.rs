//! Retry logic for backend delivery
//!
//! Exponential backoff with jitter for transient transport failures at the
//! adapter boundary. Validation failures are never retried.

use crate::error::{DialogueError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for delivery retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential growth)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (disabled)
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed)
    ///
    /// Uses exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`,
    /// with ±25% deterministic jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay_ms.saturating_mul(1u64 << attempt.min(10));
        let capped = exp_delay.min(self.max_delay_ms);

        let jitter_range = capped / 4;
        let delay = if jitter_range > 0 {
            let jitter_offset = (attempt as u64 * 7 + 3) % (jitter_range * 2 + 1);
            capped - jitter_range + jitter_offset
        } else {
            capped
        };

        Duration::from_millis(delay)
    }
}

/// Outcome of a single delivery attempt
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    /// Attempt succeeded
    Success(T),
    /// Attempt failed with a transient error
    Retryable(DialogueError),
    /// Attempt failed permanently (bail immediately)
    Fatal(DialogueError),
}

impl<T> From<Result<T>> for AttemptOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(v) => AttemptOutcome::Success(v),
            Err(e) if e.is_transient() => AttemptOutcome::Retryable(e),
            Err(e) => AttemptOutcome::Fatal(e),
        }
    }
}

/// Execute an async delivery with retry logic
///
/// After exhausting retries the last transient error is surfaced as
/// `DialogueError::Delivery` for `target`.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, target: &str, operation: F) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = AttemptOutcome<T>>,
{
    let mut last_error = String::new();

    for attempt in 0..=config.max_retries {
        match operation(attempt).await {
            AttemptOutcome::Success(value) => {
                if attempt > 0 {
                    tracing::info!(destination = %target, retries = attempt, "Delivery succeeded after retries");
                }
                return Ok(value);
            }
            AttemptOutcome::Fatal(err) => return Err(err),
            AttemptOutcome::Retryable(err) => {
                last_error = err.to_string();

                if attempt < config.max_retries {
                    let delay = config.delay_for_attempt(attempt);
                    tracing::warn!(
                        destination = %target,
                        attempt = attempt + 1,
                        max_attempts = config.max_retries + 1,
                        delay = ?delay,
                        error = %last_error,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(DialogueError::Delivery {
        target: target.to_string(),
        reason: format!(
            "gave up after {} attempts: {}",
            config.max_retries + 1,
            last_error
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 200);
        assert_eq!(RetryConfig::disabled().max_retries, 0);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        let d0 = config.delay_for_attempt(0);
        let d3 = config.delay_for_attempt(3);
        let d9 = config.delay_for_attempt(9);
        assert!(d0 >= Duration::from_millis(75) && d0 <= Duration::from_millis(125));
        assert!(d3 >= Duration::from_millis(600));
        assert!(d9 <= Duration::from_millis(1_250));
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = with_retry(&fast(), "dialogue:t", move |_| {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    AttemptOutcome::Retryable(DialogueError::Connection("refused".into()))
                } else {
                    AttemptOutcome::Success(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_delivery_error() {
        let result: Result<()> = with_retry(&fast(), "dialogue:t", |_| async {
            AttemptOutcome::Retryable(DialogueError::Connection("refused".into()))
        })
        .await;

        match result {
            Err(DialogueError::Delivery { target, reason }) => {
                assert_eq!(target, "dialogue:t");
                assert!(reason.contains("4 attempts"));
            }
            other => panic!("expected delivery error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fatal_bails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<()> = with_retry(&fast(), "x", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::Fatal(DialogueError::InvalidMessage("bad".into())) }
        })
        .await;

        assert!(matches!(result, Err(DialogueError::InvalidMessage(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: AttemptOutcome<u8> = Ok(1).into();
        assert!(matches!(ok, AttemptOutcome::Success(1)));
        let transient: AttemptOutcome<u8> = Err(DialogueError::Timeout("t".into())).into();
        assert!(matches!(transient, AttemptOutcome::Retryable(_)));
        let fatal: AttemptOutcome<u8> = Err(DialogueError::Config("c".into())).into();
        assert!(matches!(fatal, AttemptOutcome::Fatal(_)));
    }
}
