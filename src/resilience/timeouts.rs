//! Timeout enforcement.

use std::future::Future;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Bound a single network call by `deadline`.
///
/// An elapsed deadline means no response arrived, so it surfaces as a
/// [`PipelineError::Transport`] error, which the retry policy treats as
/// retryable.
pub async fn with_deadline<T, F>(deadline: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = deadline.as_millis() as u64, "Call timed out");
            Err(PipelineError::Transport(format!(
                "{operation} timed out after {}ms",
                deadline.as_millis()
            )))
        }
    }
}
