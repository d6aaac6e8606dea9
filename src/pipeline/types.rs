//! Pipeline data model.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::blockchain::types::{BlockhashContext, Pubkey, TxSignature};
use crate::blockchain::wallet::Keypair;
use crate::error::{ErrorKind, PipelineError, Result};

/// Amount of a token holding to sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum SellAmount {
    /// Exact amount in base units.
    Tokens(u64),
    /// The whole balance.
    All,
    /// A percentage (1..=100) of the balance.
    Percent(u8),
}

/// A desired on-chain action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Intent {
    #[serde(rename_all = "camelCase")]
    CreateToken {
        name: String,
        symbol: String,
        uri: String,
        /// `None` or `Some(0)` creates without buying.
        initial_buy_lamports: Option<u64>,
        /// Bound for the initial buy; the configured default when `None`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slippage_bps: Option<u16>,
    },
    #[serde(rename_all = "camelCase")]
    Buy {
        mint: Pubkey,
        lamports: u64,
        slippage_bps: u16,
    },
    #[serde(rename_all = "camelCase")]
    Sell {
        mint: Pubkey,
        amount: SellAmount,
        slippage_bps: u16,
    },
}

impl Intent {
    /// Metric and log label.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::CreateToken { .. } => "create",
            Intent::Buy { .. } => "buy",
            Intent::Sell { .. } => "sell",
        }
    }

    /// Stable key identifying this action for `wallet`.
    pub fn fingerprint(&self, wallet: &Pubkey) -> String {
        // Serializing a derived enum of plain fields cannot fail.
        let body = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        format!("{wallet}:{body}")
    }
}

/// Opaque idempotency token for one prepared transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingId(String);

impl PendingId {
    /// A fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PendingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PendingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Amounts a trade is expected to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeQuote {
    pub sol_amount: u64,
    pub token_amount: u64,
    /// Slippage bound encoded into the transaction, when known.
    pub min_output: Option<u64>,
}

/// A transaction ready for its remaining signers.
///
/// Every preparation yields a new value with a new `pending_id`.
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub intent: Intent,
    pub unsigned_blob: Vec<u8>,
    pub pending_id: PendingId,
    /// The mint address of a token being created.
    pub auxiliary_mint: Option<Pubkey>,
    /// Local keypairs that sign before the wallet.
    pub co_signers: Vec<Keypair>,
    pub blockhash: Option<BlockhashContext>,
    pub quote: Option<TradeQuote>,
}

/// A fully signed transaction bound to its pending id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub pending_id: PendingId,
    pub bytes: Vec<u8>,
    /// Fee payer signature; the transaction id on the network.
    pub signature: TxSignature,
}

/// Acknowledgement that a signed transaction was broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub signature: TxSignature,
    pub pending_id: PendingId,
    pub status: String,
}

/// Terminal status of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionStatus {
    Confirmed,
    Failed,
    TimedOut,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Confirmed => "confirmed",
            SubmissionStatus::Failed => "failed",
            SubmissionStatus::TimedOut => "timed_out",
        }
    }
}

/// The authoritative outcome for one pending id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    pub tx_signature: TxSignature,
    pub status: SubmissionStatus,
    pub pending_id: PendingId,
    pub error: Option<String>,
}

impl SubmissionResult {
    /// `Ok` only when confirmed.
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            SubmissionStatus::Confirmed => Ok(self),
            SubmissionStatus::Failed => Err(PipelineError::TransactionFailed {
                signature: self.tx_signature.to_string(),
                reason: self.error.unwrap_or_else(|| "unknown error".into()),
            }),
            SubmissionStatus::TimedOut => Err(PipelineError::TimedOut {
                signature: self.tx_signature.to_string(),
            }),
        }
    }
}

/// Identifies one run of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(pub u64);

impl FlowId {
    /// Tag of the initial update, before any flow ran. Real flows start at 1.
    pub const NONE: FlowId = FlowId(0);
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// A state transition tagged with the flow it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowUpdate {
    pub flow: FlowId,
    pub state: TxState,
}

/// Progress of one flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Prepared { pending_id: PendingId },
    Signed { pending_id: PendingId, signature: TxSignature },
    Submitted { pending_id: PendingId, signature: TxSignature },
    Confirmed { pending_id: PendingId, signature: TxSignature },
    Failed { pending_id: PendingId, signature: TxSignature, reason: String },
    TimedOut { pending_id: PendingId, signature: TxSignature },
    /// The flow stopped with an error before a terminal status was observed.
    Aborted { kind: ErrorKind, message: String },
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxState::Confirmed { .. }
                | TxState::Failed { .. }
                | TxState::TimedOut { .. }
                | TxState::Aborted { .. }
        )
    }

    pub(crate) fn from_result(result: &SubmissionResult) -> Self {
        let pending_id = result.pending_id.clone();
        let signature = result.tx_signature;
        match result.status {
            SubmissionStatus::Confirmed => TxState::Confirmed { pending_id, signature },
            SubmissionStatus::Failed => TxState::Failed {
                pending_id,
                signature,
                reason: result.error.clone().unwrap_or_default(),
            },
            SubmissionStatus::TimedOut => TxState::TimedOut { pending_id, signature },
        }
    }
}
