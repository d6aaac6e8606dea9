//! Confirmation watcher.
//!
//! Polls the signature status until the target commitment is reached, the
//! transaction reports an error, its blockhash expires or the timeout
//! elapses. A poll that exhausts its retries is logged and polling goes on.
//! Every read, retries and backoff included, is cut off at the deadline.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

use crate::blockchain::client::NetworkClient;
use crate::blockchain::types::{BlockhashContext, Commitment, SignatureStatus, TxSignature};
use crate::config::ConfirmationConfig;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::types::{PendingId, SubmissionResult, SubmissionStatus};
use crate::resilience::retries::{with_retry, RetryPolicy};

pub struct ConfirmationWatcher {
    network: Arc<dyn NetworkClient>,
    retry: RetryPolicy,
    poll_interval: Duration,
    commitment: Commitment,
}

enum Poll {
    Terminal(SubmissionStatus, Option<String>),
    Pending,
}

impl ConfirmationWatcher {
    pub fn new(network: Arc<dyn NetworkClient>, retry: RetryPolicy, poll_interval: Duration, commitment: Commitment) -> Self {
        Self {
            network,
            retry,
            poll_interval,
            commitment,
        }
    }

    pub fn from_config(
        network: Arc<dyn NetworkClient>,
        retry: RetryPolicy,
        config: &ConfirmationConfig,
        commitment: Commitment,
    ) -> Self {
        Self::new(network, retry, Duration::from_millis(config.poll_interval_ms), commitment)
    }

    /// Wait for a terminal status of `signature`.
    pub async fn await_confirmation(
        &self,
        signature: &TxSignature,
        pending_id: &PendingId,
        blockhash: &BlockhashContext,
        timeout: Duration,
    ) -> SubmissionResult {
        let started = Instant::now();
        let deadline = started + timeout;

        let timed_out = || {
            tracing::warn!(signature = %signature, timeout_ms = timeout.as_millis() as u64, "Confirmation timed out");
            (SubmissionStatus::TimedOut, Some("confirmation timeout".to_string()))
        };

        let (status, error) = loop {
            let Ok(polled) = timeout_at(deadline, self.poll_status(signature)).await else {
                break timed_out();
            };
            match polled {
                Ok(Poll::Terminal(status, error)) => break (status, error),
                Ok(Poll::Pending) => {}
                Err(e) => {
                    tracing::warn!(signature = %signature, error = %e, "Status poll failed, continuing");
                }
            }

            let Ok(expired) = timeout_at(deadline, self.blockhash_expired(blockhash)).await else {
                break timed_out();
            };
            match expired {
                Ok(Some(height)) => {
                    // The transaction may have landed between the two reads.
                    if let Ok(Ok(Poll::Terminal(status, error))) =
                        timeout_at(deadline, self.poll_status(signature)).await
                    {
                        break (status, error);
                    }
                    tracing::warn!(
                        signature = %signature,
                        block_height = height,
                        last_valid_block_height = blockhash.last_valid_block_height,
                        "Blockhash expired before confirmation"
                    );
                    break (SubmissionStatus::TimedOut, Some("blockhash expired".to_string()));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Block height poll failed, continuing"),
            }

            let now = Instant::now();
            if now >= deadline {
                break timed_out();
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        };

        metrics::record_confirmation(status.as_str(), started.elapsed());
        metrics::record_submission(status.as_str());
        tracing::info!(
            pending_id = %pending_id,
            signature = %signature,
            status = status.as_str(),
            "Confirmation finished"
        );

        SubmissionResult {
            tx_signature: *signature,
            status,
            pending_id: pending_id.clone(),
            error,
        }
    }

    async fn poll_status(&self, signature: &TxSignature) -> Result<Poll> {
        let status: Option<SignatureStatus> = with_retry(&self.retry, "get_signature_status", || {
            self.network.get_signature_status(signature)
        })
        .await?;

        Ok(match status {
            Some(status) if status.err.is_some() => Poll::Terminal(
                SubmissionStatus::Failed,
                status.err.as_ref().map(|e| e.to_string()),
            ),
            Some(status) if status.satisfies(self.commitment) => {
                Poll::Terminal(SubmissionStatus::Confirmed, None)
            }
            _ => Poll::Pending,
        })
    }

    /// Current block height if it is past the blockhash's validity.
    async fn blockhash_expired(&self, blockhash: &BlockhashContext) -> Result<Option<u64>> {
        let height = with_retry(&self.retry, "get_block_height", || self.network.get_block_height()).await?;
        Ok((height > blockhash.last_valid_block_height).then_some(height))
    }
}

impl std::fmt::Debug for ConfirmationWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationWatcher")
            .field("poll_interval", &self.poll_interval)
            .field("commitment", &self.commitment)
            .finish_non_exhaustive()
    }
}
