//! HTTP client for the launchpad authority.
//!
//! Every request carries the session credential in `x-request-signature`
//! and the wallet address in the body (or path). Amounts are integer
//! lamports and base token units.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::auth::{AuthCredential, AUTH_HEADER};
use crate::config::AuthorityConfig;
use crate::error::{is_already_processed_message, ErrorKind, PipelineError, Result};
use crate::pipeline::types::PendingId;
use crate::resilience::timeouts::with_deadline;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAndBuyRequest {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub sol_amount: u64,
    pub wallet_address: String,
    pub slippage_bps: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyRequest {
    pub token_mint: String,
    pub sol_amount: u64,
    pub wallet_address: String,
    pub slippage_bps: u16,
}

/// Exactly one of `token_amount` and `percentage` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellRequest {
    pub token_mint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    pub wallet_address: String,
    pub slippage_bps: u16,
}

/// Response to the three preparation endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
    /// Base64 serialized transaction awaiting the wallet's signature.
    pub transaction: String,
    pub pending_transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_mint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sol_amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_output: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_valid_block_height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSignedRequest {
    pub signed_transaction: String,
    pub wallet_address: String,
    pub use_jito: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSignedResponse {
    pub transaction_signature: String,
    pub status: String,
    pub pending_transaction_id: String,
}

/// Error body returned by the authority.
///
/// `kind` and the detail fields let the client rebuild the original
/// [`PipelineError`]; bodies without them fall back to the HTTP status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(alias = "message")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_ms: Option<u64>,
}

impl ErrorBody {
    /// Body carrying only a message.
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn from_error(error: &PipelineError) -> Self {
        let kind = error.kind();
        let message = match kind {
            ErrorKind::Fatal | ErrorKind::RetriesExhausted => error.root().to_string(),
            _ => error.detail(),
        };
        let mut body = Self {
            error: message,
            kind: Some(kind),
            ..Self::default()
        };
        match error {
            PipelineError::StaleState { age_ms, max_age_ms } => {
                body.age_ms = Some(*age_ms);
                body.max_age_ms = Some(*max_age_ms);
            }
            PipelineError::AlreadyProcessedAmbiguous { signature, .. } => {
                body.signature = signature.clone();
            }
            PipelineError::TimedOut { signature } => body.signature = Some(signature.clone()),
            PipelineError::RetriesExhausted { attempts, .. } => body.attempts = Some(*attempts),
            _ => {}
        }
        body
    }

    /// Rebuild the error the authority reported with `status`.
    pub fn into_error(self, status: u16) -> PipelineError {
        let message = self.error;
        match self.kind {
            Some(ErrorKind::AuthUnavailable) => PipelineError::AuthUnavailable(message),
            Some(ErrorKind::InsufficientInput) => PipelineError::InsufficientInput(message),
            Some(ErrorKind::StaleState) => PipelineError::StaleState {
                age_ms: self.age_ms.unwrap_or_default(),
                max_age_ms: self.max_age_ms.unwrap_or_default(),
            },
            Some(ErrorKind::AlreadyInFlight) => PipelineError::AlreadyInFlight(message),
            Some(ErrorKind::AlreadyProcessedAmbiguous) => PipelineError::AlreadyProcessedAmbiguous {
                signature: self.signature,
                message,
            },
            Some(ErrorKind::TimedOut) => PipelineError::TimedOut {
                signature: self.signature.unwrap_or_default(),
            },
            Some(ErrorKind::RetriesExhausted) => PipelineError::RetriesExhausted {
                attempts: self.attempts.unwrap_or(1),
                last: Box::new(PipelineError::Authority { status, message }),
            },
            Some(ErrorKind::Fatal) | None => {
                if status == 409 || is_already_processed_message(&message) {
                    PipelineError::AlreadyProcessedAmbiguous {
                        signature: self.signature,
                        message,
                    }
                } else if status == 423 && self.kind.is_none() {
                    PipelineError::AlreadyInFlight(message)
                } else {
                    PipelineError::Authority { status, message }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthorityClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AuthorityClient {
    pub fn new(config: &AuthorityConfig) -> Result<Self> {
        let parsed: url::Url = config.base_url.parse().map_err(|e| {
            PipelineError::Config(format!("Invalid authority URL '{}': {}", config.base_url, e))
        })?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create_and_buy(
        &self,
        request: &CreateAndBuyRequest,
        credential: &AuthCredential,
    ) -> Result<PrepareResponse> {
        self.post("/tokens/create-and-buy", request, credential).await
    }

    pub async fn buy(&self, request: &BuyRequest, credential: &AuthCredential) -> Result<PrepareResponse> {
        self.post("/tokens/buy", request, credential).await
    }

    pub async fn sell(&self, request: &SellRequest, credential: &AuthCredential) -> Result<PrepareResponse> {
        self.post("/tokens/sell", request, credential).await
    }

    /// Hand a signed transaction to the authority for broadcast.
    ///
    /// Safe to repeat with the same id and bytes: the authority answers a
    /// duplicate with the original result.
    pub async fn submit_signed(
        &self,
        pending_id: &PendingId,
        request: &SubmitSignedRequest,
        credential: &AuthCredential,
    ) -> Result<SubmitSignedResponse> {
        let path = format!("/tokens/{pending_id}/submit-signed");
        self.post(&path, request, credential).await
    }

    /// Transaction history recorded for the credential's wallet.
    pub async fn transaction_history(&self, credential: &AuthCredential) -> Result<Vec<Value>> {
        let url = format!("{}/transactions/{}", self.base_url, credential.wallet_address);
        let request = self
            .http
            .get(url)
            .header(AUTH_HEADER, &credential.signature);
        self.send("transaction_history", request).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        credential: &AuthCredential,
    ) -> Result<T> {
        let request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(AUTH_HEADER, &credential.signature)
            .json(body);
        self.send(path, request).await
    }

    async fn send<T: DeserializeOwned>(&self, operation: &str, request: reqwest::RequestBuilder) -> Result<T> {
        let response = with_deadline(self.timeout, operation, async {
            request.send().await.map_err(PipelineError::from)
        })
        .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| {
            if text.is_empty() {
                ErrorBody::message(status.canonical_reason().unwrap_or("request failed"))
            } else {
                ErrorBody::message(text)
            }
        });

        tracing::warn!(
            operation,
            status = status.as_u16(),
            kind = ?body.kind,
            error = %body.error,
            "Authority request failed"
        );
        Err(body.into_error(status.as_u16()))
    }
}
