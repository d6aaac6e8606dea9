//! Retry logic.
//!
//! # Responsibilities
//! - Classify errors as retryable (rate limiting, congestion) or fatal
//! - Re-invoke an operation with linear backoff
//! - Surface `RetriesExhausted` with the last underlying error
//!
//! # Design Decisions
//! - Only reads and the idempotency-keyed submit are wrapped; a raw
//!   broadcast is never retried through this module
//! - Fatal errors propagate on first occurrence
//! - `AlreadyProcessedAmbiguous` is always fatal

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::resilience::backoff::linear_backoff;

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Fatal,
}

/// Function deciding whether an error may be retried.
pub type Classifier = fn(&PipelineError) -> Classification;

/// Stateless retry policy shared by every network call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of invocations, including the first.
    pub max_attempts: u32,
    /// Delay unit for linear backoff.
    pub base_delay: Duration,
    classifier: Classifier,
}

impl RetryPolicy {
    /// Create a policy using [`classify_error`].
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            classifier: classify_error,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
    }

    /// Replace the classifier.
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// A policy that invokes the operation exactly once.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn classify(&self, error: &PipelineError) -> Classification {
        (self.classifier)(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Whether `message` carries `code` as a standalone token.
fn mentions_status(message: &str, code: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == code)
}

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("access forbidden")
        || lower.contains("too many requests")
        || lower.contains("rate limit")
        || mentions_status(&lower, "403")
        || mentions_status(&lower, "429")
}

/// Default classification.
///
/// Retryable: RPC 403/429 or a message that reads like rate limiting,
/// authority 429, and transport failures where no response arrived.
pub fn classify_error(error: &PipelineError) -> Classification {
    match error {
        PipelineError::Rpc { status: Some(403 | 429), .. } => Classification::Retryable,
        PipelineError::Rpc { message, .. } if mentions_rate_limit(message) => {
            Classification::Retryable
        }
        PipelineError::Authority { status: 429, .. } => Classification::Retryable,
        PipelineError::Transport(_) => Classification::Retryable,
        _ => Classification::Fatal,
    }
}

/// Run `op` until it succeeds, fails fatally, or `policy.max_attempts` is reached.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if policy.classify(&error) == Classification::Fatal {
            return Err(error);
        }

        if attempt >= policy.max_attempts {
            tracing::warn!(operation, attempts = attempt, error = %error, "Retries exhausted");
            metrics::record_retries_exhausted(operation);
            return Err(PipelineError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(error),
            });
        }

        let delay = linear_backoff(attempt, policy.base_delay);
        tracing::warn!(
            operation,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Rate limited, retrying"
        );
        metrics::record_retry(operation);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn rate_limited() -> PipelineError {
        PipelineError::Rpc { status: Some(429), message: "Too Many Requests".into() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_retryable_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let c = calls.clone();
        let result = with_retry(&policy, "test", move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(4, Duration::from_millis(10));

        let c = calls.clone();
        let result: Result<()> = with_retry(&policy, "test", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Rpc { status: Some(403), message: "Access forbidden".into() })
            }
        })
        .await;

        match result {
            Err(PipelineError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, PipelineError::Rpc { status: Some(403), .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_propagates_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(10));

        let c = calls.clone();
        let result: Result<()> = with_retry(&policy, "test", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Rpc { status: Some(500), message: "Internal error".into() })
            }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Rpc { status: Some(500), .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_delays_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        let start = tokio::time::Instant::now();

        let _: Result<()> = with_retry(&policy, "test", || async { Err(rate_limited()) }).await;

        // 1000ms after the first failure, 2000ms after the second.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3100), "elapsed {elapsed:?}");
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_error(&rate_limited()), Classification::Retryable);
        assert_eq!(
            classify_error(&PipelineError::Rpc {
                status: None,
                message: "server responded with 403 Access forbidden".into()
            }),
            Classification::Retryable
        );
        assert_eq!(
            classify_error(&PipelineError::Transport("connection reset".into())),
            Classification::Retryable
        );
        assert_eq!(
            classify_error(&PipelineError::AlreadyProcessedAmbiguous {
                signature: None,
                message: "already been processed".into()
            }),
            Classification::Fatal
        );
        assert_eq!(
            classify_error(&PipelineError::Authority { status: 403, message: "bad signature".into() }),
            Classification::Fatal
        );
    }

    #[test]
    fn test_status_codes_inside_other_tokens_are_fatal() {
        for message in [
            "custom program error: 0x1429",
            "account 4039 not found",
            "slot 14290 skipped",
        ] {
            assert_eq!(
                classify_error(&PipelineError::Rpc { status: None, message: message.into() }),
                Classification::Fatal,
                "{message}"
            );
        }
        assert_eq!(
            classify_error(&PipelineError::Rpc { status: None, message: "HTTP 429: slow down".into() }),
            Classification::Retryable
        );
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let policy = RetryPolicy::new(3, Duration::ZERO).with_classifier(|_| Classification::Fatal);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let _: Result<()> = with_retry(&policy, "test", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(rate_limited())
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
