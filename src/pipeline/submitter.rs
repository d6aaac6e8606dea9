//! Submission coordination.
//!
//! # Responsibilities
//! - Hand a signed transaction to the authority, keyed by its pending id
//! - Or broadcast it directly, at most once per pending id
//! - Surface "already processed" as [`PipelineError::AlreadyProcessedAmbiguous`]
//!
//! # Design Decisions
//! - The authority submit is idempotent, so it runs under `with_retry` with
//!   the same pending id and the same bytes on every attempt
//! - A direct broadcast is never retried blindly: after a failed send the
//!   signature status is checked first, and identical bytes are resent only
//!   if the network has not seen them

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;

use crate::auth::AuthCredential;
use crate::authority::client::{AuthorityClient, SubmitSignedRequest};
use crate::authority::ledger::PendingLedger;
use crate::blockchain::client::NetworkClient;
use crate::blockchain::types::TxSignature;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::types::{PendingId, SignedTransaction, SubmitReceipt};
use crate::resilience::backoff::linear_backoff;
use crate::resilience::retries::{with_retry, Classification, RetryPolicy};

/// Status recorded for a transaction that was handed to the network.
pub const SUBMITTED: &str = "submitted";

#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, signed: &SignedTransaction, credential: &AuthCredential) -> Result<SubmitReceipt>;
}

fn with_signature(error: PipelineError, signed: &SignedTransaction) -> PipelineError {
    match error {
        PipelineError::AlreadyProcessedAmbiguous { signature: None, message } => {
            PipelineError::AlreadyProcessedAmbiguous {
                signature: Some(signed.signature.to_string()),
                message,
            }
        }
        other => other,
    }
}

/// Submits through the authority's `submit-signed` endpoint.
#[derive(Debug, Clone)]
pub struct AuthoritySubmitter {
    authority: Arc<AuthorityClient>,
    retry: RetryPolicy,
    use_jito: bool,
}

impl AuthoritySubmitter {
    pub fn new(authority: Arc<AuthorityClient>, retry: RetryPolicy, use_jito: bool) -> Self {
        Self {
            authority,
            retry,
            use_jito,
        }
    }
}

#[async_trait]
impl Submitter for AuthoritySubmitter {
    async fn submit(&self, signed: &SignedTransaction, credential: &AuthCredential) -> Result<SubmitReceipt> {
        let request = SubmitSignedRequest {
            signed_transaction: BASE64.encode(&signed.bytes),
            wallet_address: credential.wallet_address.to_string(),
            use_jito: self.use_jito,
        };

        let response = with_retry(&self.retry, "submit_signed", || {
            self.authority.submit_signed(&signed.pending_id, &request, credential)
        })
        .await
        .map_err(|e| with_signature(e, signed))?;

        let signature: TxSignature = response.transaction_signature.parse()?;
        if signature != signed.signature {
            tracing::warn!(
                pending_id = %signed.pending_id,
                expected = %signed.signature,
                reported = %signature,
                "Authority reported a different signature"
            );
        }
        if response.pending_transaction_id != signed.pending_id.as_str() {
            return Err(PipelineError::Authority {
                status: 200,
                message: format!(
                    "submit for {} answered with pending id {}",
                    signed.pending_id, response.pending_transaction_id
                ),
            });
        }

        tracing::info!(
            pending_id = %signed.pending_id,
            signature = %signature,
            status = %response.status,
            "Transaction submitted via authority"
        );
        Ok(SubmitReceipt {
            signature,
            pending_id: signed.pending_id.clone(),
            status: response.status,
        })
    }
}

/// Broadcasts straight to the network, at most once per pending id.
pub struct DirectSubmitter {
    network: Arc<dyn NetworkClient>,
    ledger: Arc<PendingLedger>,
    retry: RetryPolicy,
}

impl DirectSubmitter {
    pub fn new(network: Arc<dyn NetworkClient>, retry: RetryPolicy) -> Self {
        Self::with_ledger(network, Arc::new(PendingLedger::new()), retry)
    }

    /// Share `ledger` with another owner (the reference authority does).
    pub fn with_ledger(network: Arc<dyn NetworkClient>, ledger: Arc<PendingLedger>, retry: RetryPolicy) -> Self {
        Self { network, ledger, retry }
    }

    pub fn ledger(&self) -> &Arc<PendingLedger> {
        &self.ledger
    }

    /// Broadcast `signed` unless its pending id already has a receipt.
    pub async fn broadcast_once(&self, signed: &SignedTransaction) -> Result<SubmitReceipt> {
        let handle = self.ledger.get_or_create(&signed.pending_id, "direct");
        let mut entry = handle.lock().await;

        if let Some(receipt) = &entry.receipt {
            tracing::info!(pending_id = %signed.pending_id, "Duplicate submit, returning recorded result");
            metrics::record_duplicate_submission();
            return Ok(receipt.clone());
        }

        // A previous call may have sent these bytes and lost the answer.
        if entry.broadcast_attempted && self.network_has_seen(signed).await? {
            let receipt = self.receipt(signed);
            entry.receipt = Some(receipt.clone());
            return Ok(receipt);
        }

        entry.broadcast_attempted = true;
        let receipt = self.send_guarded(signed).await.map_err(|e| with_signature(e, signed))?;
        entry.receipt = Some(receipt.clone());
        Ok(receipt)
    }

    async fn send_guarded(&self, signed: &SignedTransaction) -> Result<SubmitReceipt> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.network.send_transaction(&signed.bytes).await {
                Ok(signature) => {
                    if signature != signed.signature {
                        tracing::warn!(expected = %signed.signature, reported = %signature, "Node reported a different signature");
                    }
                    tracing::info!(pending_id = %signed.pending_id, signature = %signed.signature, "Transaction broadcast");
                    return Ok(self.receipt(signed));
                }
                Err(e) => e,
            };

            if self.retry.classify(&error) == Classification::Fatal {
                return Err(error);
            }

            match self.network_has_seen(signed).await {
                Ok(true) => {
                    tracing::info!(pending_id = %signed.pending_id, "Send failed but network has the transaction");
                    return Ok(self.receipt(signed));
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "Status check after failed send also failed"),
            }

            if attempt >= self.retry.max_attempts {
                metrics::record_retries_exhausted("send_transaction");
                return Err(PipelineError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = linear_backoff(attempt, self.retry.base_delay);
            tracing::warn!(
                pending_id = %signed.pending_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Send failed and transaction unseen, resending identical bytes"
            );
            metrics::record_retry("send_transaction");
            tokio::time::sleep(delay).await;
        }
    }

    async fn network_has_seen(&self, signed: &SignedTransaction) -> Result<bool> {
        let status = with_retry(&self.retry, "get_signature_status", || {
            self.network.get_signature_status(&signed.signature)
        })
        .await?;
        Ok(status.is_some())
    }

    fn receipt(&self, signed: &SignedTransaction) -> SubmitReceipt {
        SubmitReceipt {
            signature: signed.signature,
            pending_id: signed.pending_id.clone(),
            status: SUBMITTED.to_string(),
        }
    }

    /// Recorded receipt for `id`, if it was broadcast.
    pub async fn recorded(&self, id: &PendingId) -> Option<SubmitReceipt> {
        let handle = self.ledger.get(id)?;
        let entry = handle.lock().await;
        entry.receipt.clone()
    }
}

#[async_trait]
impl Submitter for DirectSubmitter {
    async fn submit(&self, signed: &SignedTransaction, _credential: &AuthCredential) -> Result<SubmitReceipt> {
        self.broadcast_once(signed).await
    }
}

impl std::fmt::Debug for DirectSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectSubmitter")
            .field("ledger_entries", &self.ledger.len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
