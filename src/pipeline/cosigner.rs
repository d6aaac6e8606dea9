//! Local co-signing and the wallet signing gate.
//!
//! Local co-signers (the fresh mint keypair of a create) sign first, the
//! wallet signs second. The wallet's output is checked rather than trusted:
//! the message must be byte-identical and every signature that was present
//! before the wallet signed must still be there.

use crate::blockchain::transaction::WireTransaction;
use crate::blockchain::wallet::ExternalWallet;
use crate::error::{PipelineError, Result};
use crate::pipeline::types::{PreparedTransaction, SignedTransaction};

/// Apply the local co-signatures of `prepared`.
///
/// Signatures already present in the blob (for example a mint signature
/// added by the authority) are verified and kept.
pub fn co_sign(prepared: &PreparedTransaction) -> Result<WireTransaction> {
    let mut tx = WireTransaction::from_bytes(&prepared.unsigned_blob)?;
    for signer in &prepared.co_signers {
        tx.sign(signer)?;
    }
    tx.verify_signatures()?;
    Ok(tx)
}

/// Co-sign locally, then have the wallet add its signature.
pub async fn sign(prepared: &PreparedTransaction, wallet: &dyn ExternalWallet) -> Result<SignedTransaction> {
    let address = wallet
        .address()
        .ok_or_else(|| PipelineError::AuthUnavailable("wallet not connected".into()))?;

    let co_signed = co_sign(prepared)?;
    let signers = co_signed.required_signers()?;
    if !signers.contains(&address) {
        return Err(PipelineError::Signing(format!(
            "transaction does not require the connected wallet {address}"
        )));
    }

    let returned = wallet
        .sign_transaction(&co_signed.to_bytes())
        .await
        .map_err(|e| PipelineError::Signing(format!("wallet signing failed: {e}")))?;
    let signed = WireTransaction::from_bytes(&returned)?;

    if signed.message() != co_signed.message() {
        return Err(PipelineError::Signing(
            "wallet returned a transaction with a different message".into(),
        ));
    }
    for signer in signers.iter().filter(|s| **s != address) {
        if let Some(before) = co_signed.signature_of(signer) {
            if signed.signature_of(signer) != Some(before) {
                return Err(PipelineError::Signing(format!(
                    "wallet dropped the co-signature of {signer}"
                )));
            }
        }
    }
    signed.verify_complete()?;

    let signature = signed
        .primary_signature()
        .ok_or_else(|| PipelineError::Signing("fee payer signature missing".into()))?;

    tracing::debug!(pending_id = %prepared.pending_id, signature = %signature, "Transaction signed");

    Ok(SignedTransaction {
        pending_id: prepared.pending_id.clone(),
        bytes: signed.to_bytes(),
        signature,
    })
}
