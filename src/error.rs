//! Error taxonomy for the transaction pipeline.
//!
//! Every terminal error maps to one [`ErrorKind`]. Underlying causes (RPC,
//! transport, authority, signing) keep their detail but report as
//! [`ErrorKind::Fatal`] so callers can decide whether a retry is safe
//! without parsing strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`PipelineError`].
///
/// Serialized in snake_case on the authority's error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthUnavailable,
    RetriesExhausted,
    InsufficientInput,
    StaleState,
    AlreadyInFlight,
    AlreadyProcessedAmbiguous,
    TimedOut,
    Fatal,
}

/// Errors that can occur anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Wallet is disconnected, cannot sign messages, or the user declined.
    #[error("Authentication unavailable: {0}")]
    AuthUnavailable(String),

    /// A retryable failure persisted for every allowed attempt.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<PipelineError>,
    },

    /// An input or computed trade amount is zero.
    #[error("Insufficient input: {0}")]
    InsufficientInput(String),

    /// Bonding-curve state is older than the accepted bound.
    #[error("Bonding curve state is {age_ms}ms old (max {max_age_ms}ms)")]
    StaleState { age_ms: u64, max_age_ms: u64 },

    /// Another attempt for the same intent or pending id is running.
    #[error("Already in flight: {0}")]
    AlreadyInFlight(String),

    /// The network or authority reports the transaction as already consumed.
    ///
    /// The transaction may have landed. Look the signature up before acting.
    #[error("Transaction already processed (status unknown): {message}")]
    AlreadyProcessedAmbiguous {
        signature: Option<String>,
        message: String,
    },

    /// No terminal confirmation was observed in time.
    #[error("Transaction {signature} not confirmed in time")]
    TimedOut { signature: String },

    /// JSON-RPC level failure (HTTP status or error object).
    #[error("RPC error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Rpc { status: Option<u16>, message: String },

    /// No response was received (connect failure, timeout, reset).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The authority answered with a non-success status.
    #[error("Authority returned {status}: {message}")]
    Authority { status: u16, message: String },

    /// A signer failed or a signature did not verify.
    #[error("Signing error: {0}")]
    Signing(String),

    /// The transaction bytes could not be parsed.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// A response or encoded value could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The transaction executed and failed on-chain.
    #[error("Transaction {signature} failed: {reason}")]
    TransactionFailed { signature: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Classify this error into the public taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::AuthUnavailable(_) => ErrorKind::AuthUnavailable,
            PipelineError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            PipelineError::InsufficientInput(_) => ErrorKind::InsufficientInput,
            PipelineError::StaleState { .. } => ErrorKind::StaleState,
            PipelineError::AlreadyInFlight(_) => ErrorKind::AlreadyInFlight,
            PipelineError::AlreadyProcessedAmbiguous { .. } => {
                ErrorKind::AlreadyProcessedAmbiguous
            }
            PipelineError::TimedOut { .. } => ErrorKind::TimedOut,
            PipelineError::Rpc { .. }
            | PipelineError::Transport(_)
            | PipelineError::Authority { .. }
            | PipelineError::Signing(_)
            | PipelineError::InvalidTransaction(_)
            | PipelineError::Decode(_)
            | PipelineError::TransactionFailed { .. }
            | PipelineError::Config(_) => ErrorKind::Fatal,
        }
    }

    /// Message without the variant's display prefix, for re-wrapping on
    /// the other side of an HTTP hop.
    pub fn detail(&self) -> String {
        match self {
            PipelineError::AuthUnavailable(m)
            | PipelineError::InsufficientInput(m)
            | PipelineError::AlreadyInFlight(m)
            | PipelineError::Transport(m)
            | PipelineError::Signing(m)
            | PipelineError::InvalidTransaction(m)
            | PipelineError::Decode(m)
            | PipelineError::Config(m) => m.clone(),
            PipelineError::AlreadyProcessedAmbiguous { message, .. } => message.clone(),
            PipelineError::RetriesExhausted { last, .. } => last.detail(),
            other => other.to_string(),
        }
    }

    /// The last underlying error, unwrapping `RetriesExhausted`.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            PipelineError::Transport(e.to_string())
        } else if e.is_decode() {
            PipelineError::Decode(e.to_string())
        } else {
            PipelineError::Rpc {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Decode(e.to_string())
    }
}

impl From<base64::DecodeError> for PipelineError {
    fn from(e: base64::DecodeError) -> Self {
        PipelineError::Decode(format!("invalid base64: {e}"))
    }
}

/// Whether a message reports the transaction or blockhash as already consumed.
pub fn is_already_processed_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("already been processed")
        || lower.contains("already processed")
        || lower.contains("alreadyprocessed")
}
