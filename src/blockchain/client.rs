//! Solana JSON-RPC client with timeout and failover.
//!
//! # Responsibilities
//! - Query chain state (blockhash, block height, signature status, balances)
//! - Broadcast signed transactions
//! - Map HTTP and JSON-RPC failures onto [`PipelineError`] so the retry
//!   policy can classify them
//!
//! Reads fail over across the configured endpoints. Broadcasts go to the
//! primary endpoint only: sending the same bytes to several nodes is left to
//! the caller, which knows whether a resend is safe.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::blockchain::transaction::WireTransaction;
use crate::blockchain::types::{
    BlockhashContext, Commitment, Pubkey, RpcConfig, SignatureStatus, TxSignature,
};
use crate::error::{is_already_processed_message, PipelineError, Result};
use crate::resilience::timeouts::with_deadline;

/// Network operations the pipeline needs.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn get_latest_blockhash(&self) -> Result<BlockhashContext>;

    async fn get_block_height(&self) -> Result<u64>;

    /// Status of one signature, or `None` if the network has not seen it.
    async fn get_signature_status(&self, signature: &TxSignature) -> Result<Option<SignatureStatus>>;

    /// Broadcast a fully signed transaction and return its signature.
    async fn send_transaction(&self, transaction: &[u8]) -> Result<TxSignature>;

    /// Lamport balance of an account.
    async fn get_balance(&self, account: &Pubkey) -> Result<u64>;

    /// Total balance (base units) of `mint` held by `owner` across token accounts.
    async fn get_token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<u64>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Contextual<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

/// JSON-RPC client over HTTP.
pub struct SolanaRpcClient {
    http: reqwest::Client,
    endpoints: Vec<url::Url>,
    commitment: Commitment,
    timeout: Duration,
    next_id: AtomicU64,
}

impl SolanaRpcClient {
    /// Create a client for the primary URL plus any valid failover URLs.
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let primary: url::Url = config.url.parse().map_err(|e| {
            PipelineError::Config(format!("Invalid RPC URL '{}': {}", config.url, e))
        })?;

        let mut endpoints = vec![primary];
        for url_str in &config.failover_urls {
            match url_str.parse() {
                Ok(url) => endpoints.push(url),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {e}")))?;

        tracing::info!(
            rpc_url = %config.url,
            failovers = endpoints.len() - 1,
            commitment = config.commitment.as_str(),
            "RPC client initialized"
        );

        Ok(Self {
            http,
            endpoints,
            commitment: config.commitment,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    /// One JSON-RPC request against one endpoint.
    async fn call_endpoint(&self, endpoint: &url::Url, method: &str, params: &Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response = with_deadline(self.timeout, method, async {
            self.http
                .post(endpoint.clone())
                .json(&body)
                .send()
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Rpc {
                status: Some(status.as_u16()),
                message: if text.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    text
                },
            });
        }

        let parsed: RpcResponse = response.json().await?;
        if let Some(error) = parsed.error {
            if is_already_processed_message(&error.message) {
                return Err(PipelineError::AlreadyProcessedAmbiguous {
                    signature: None,
                    message: error.message,
                });
            }
            // Some providers report throttling in the error object instead of the HTTP status.
            let status = match error.code {
                403 | 429 => Some(error.code as u16),
                _ => None,
            };
            return Err(PipelineError::Rpc {
                status,
                message: format!("{} (code {})", error.message, error.code),
            });
        }

        parsed
            .result
            .ok_or_else(|| PipelineError::Decode(format!("{method}: response has no result")))
    }

    /// Try each endpoint in order until one answers.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut last_error = None;
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            match self.call_endpoint(endpoint, method, &params).await {
                Ok(value) => return Ok(value),
                Err(e @ (PipelineError::Rpc { .. } | PipelineError::Transport(_))) => {
                    tracing::warn!(provider_idx = i, method, error = %e, "RPC error, trying next provider");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| PipelineError::Transport("No RPC endpoints configured".into())))
    }

    /// Check if the RPC is reachable.
    pub async fn is_healthy(&self) -> bool {
        self.get_block_height().await.is_ok()
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl NetworkClient for SolanaRpcClient {
    async fn get_latest_blockhash(&self) -> Result<BlockhashContext> {
        let value = self
            .call("getLatestBlockhash", json!([{ "commitment": self.commitment.as_str() }]))
            .await?;
        let latest: Contextual<LatestBlockhash> = decode(value)?;
        Ok(BlockhashContext {
            blockhash: latest.value.blockhash,
            last_valid_block_height: latest.value.last_valid_block_height,
        })
    }

    async fn get_block_height(&self) -> Result<u64> {
        let value = self
            .call("getBlockHeight", json!([{ "commitment": self.commitment.as_str() }]))
            .await?;
        decode(value)
    }

    async fn get_signature_status(&self, signature: &TxSignature) -> Result<Option<SignatureStatus>> {
        let value = self
            .call(
                "getSignatureStatuses",
                json!([[signature.to_string()], { "searchTransactionHistory": true }]),
            )
            .await?;
        let statuses: Contextual<Vec<Option<SignatureStatus>>> = decode(value)?;
        Ok(statuses.value.into_iter().next().flatten())
    }

    async fn send_transaction(&self, transaction: &[u8]) -> Result<TxSignature> {
        let tx = WireTransaction::from_bytes(transaction)?;
        let expected = tx.primary_signature();
        let params = json!([
            tx.to_base64(),
            { "encoding": "base64", "preflightCommitment": self.commitment.as_str() }
        ]);

        let value = match self.call_endpoint(&self.endpoints[0], "sendTransaction", &params).await {
            Ok(value) => value,
            Err(PipelineError::AlreadyProcessedAmbiguous { message, .. }) => {
                return Err(PipelineError::AlreadyProcessedAmbiguous {
                    signature: expected.map(|s| s.to_string()),
                    message,
                });
            }
            Err(e) => return Err(e),
        };

        let signature: String = decode(value)?;
        let signature: TxSignature = signature.parse()?;
        tracing::info!(signature = %signature, "Transaction broadcast");
        Ok(signature)
    }

    async fn get_balance(&self, account: &Pubkey) -> Result<u64> {
        let value = self
            .call(
                "getBalance",
                json!([account.to_string(), { "commitment": self.commitment.as_str() }]),
            )
            .await?;
        let balance: Contextual<u64> = decode(value)?;
        Ok(balance.value)
    }

    async fn get_token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<u64> {
        let value = self
            .call(
                "getTokenAccountsByOwner",
                json!([
                    owner.to_string(),
                    { "mint": mint.to_string() },
                    { "encoding": "jsonParsed", "commitment": self.commitment.as_str() }
                ]),
            )
            .await?;
        let accounts: Contextual<Vec<Value>> = decode(value)?;

        let mut total: u64 = 0;
        for account in accounts.value {
            let amount = account
                .pointer("/account/data/parsed/info/tokenAmount/amount")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::Decode("token account without parsed amount".into()))?;
            let amount: u64 = amount
                .parse()
                .map_err(|e| PipelineError::Decode(format!("invalid token amount '{amount}': {e}")))?;
            total = total.saturating_add(amount);
        }
        Ok(total)
    }
}

impl std::fmt::Debug for SolanaRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaRpcClient")
            .field("rpc_url", &self.endpoints[0].as_str())
            .field("failovers", &(self.endpoints.len() - 1))
            .field("commitment", &self.commitment)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};

    async fn spawn_rpc<F>(handler: F) -> String
    where
        F: Fn(Value) -> (StatusCode, Value) + Clone + Send + Sync + 'static,
    {
        let app = Router::new().route(
            "/",
            post(move |Json(body): Json<Value>| {
                let handler = handler.clone();
                async move {
                    let (status, value) = handler(body);
                    (status, Json(value))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/")
    }

    fn config(url: String) -> RpcConfig {
        RpcConfig {
            url,
            timeout_secs: 2,
            ..RpcConfig::default()
        }
    }

    #[tokio::test]
    async fn test_latest_blockhash() {
        let url = spawn_rpc(|body| {
            assert_eq!(body["method"], "getLatestBlockhash");
            (
                StatusCode::OK,
                json!({"jsonrpc": "2.0", "id": body["id"], "result": {
                    "context": {"slot": 1},
                    "value": {"blockhash": "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N", "lastValidBlockHeight": 150}
                }}),
            )
        })
        .await;

        let client = SolanaRpcClient::new(&config(url)).unwrap();
        let ctx = client.get_latest_blockhash().await.unwrap();
        assert_eq!(ctx.last_valid_block_height, 150);
    }

    #[tokio::test]
    async fn test_http_429_maps_to_rpc_status() {
        let url = spawn_rpc(|_| (StatusCode::TOO_MANY_REQUESTS, json!({"message": "Too Many Requests"}))).await;
        let client = SolanaRpcClient::new(&config(url)).unwrap();
        let err = client.get_block_height().await.unwrap_err();
        assert!(matches!(err, PipelineError::Rpc { status: Some(429), .. }));
    }

    #[tokio::test]
    async fn test_failover_to_second_endpoint() {
        let bad = spawn_rpc(|_| (StatusCode::FORBIDDEN, json!({"message": "Access forbidden"}))).await;
        let good = spawn_rpc(|body| {
            (StatusCode::OK, json!({"jsonrpc": "2.0", "id": body["id"], "result": 4242}))
        })
        .await;

        let mut cfg = config(bad);
        cfg.failover_urls.push(good);
        let client = SolanaRpcClient::new(&cfg).unwrap();
        assert_eq!(client.get_block_height().await.unwrap(), 4242);
    }

    #[tokio::test]
    async fn test_already_processed_send() {
        let url = spawn_rpc(|body| {
            (
                StatusCode::OK,
                json!({"jsonrpc": "2.0", "id": body["id"], "error": {
                    "code": -32002,
                    "message": "Transaction simulation failed: This transaction has already been processed"
                }}),
            )
        })
        .await;

        let payer = crate::blockchain::wallet::Keypair::generate();
        let message = crate::blockchain::transaction::compile_legacy_message(
            &[payer.pubkey()],
            &[],
            &[],
            &[1u8; 32],
            &[],
        );
        let mut tx = WireTransaction::unsigned(message).unwrap();
        let sig = tx.sign(&payer).unwrap();

        let client = SolanaRpcClient::new(&config(url)).unwrap();
        match client.send_transaction(&tx.to_bytes()).await {
            Err(PipelineError::AlreadyProcessedAmbiguous { signature, .. }) => {
                assert_eq!(signature, Some(sig.to_string()));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_balance_sums_accounts() {
        let url = spawn_rpc(|body| {
            let account = |amount: &str| {
                json!({"pubkey": "x", "account": {"data": {"parsed": {"info": {"tokenAmount": {"amount": amount}}}}}})
            };
            (
                StatusCode::OK,
                json!({"jsonrpc": "2.0", "id": body["id"], "result": {
                    "context": {"slot": 1},
                    "value": [account("1000"), account("234")]
                }}),
            )
        })
        .await;

        let client = SolanaRpcClient::new(&config(url)).unwrap();
        let owner = Pubkey::new([1u8; 32]);
        let mint = Pubkey::new([2u8; 32]);
        assert_eq!(client.get_token_balance(&owner, &mint).await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        let client = SolanaRpcClient::new(&config("http://127.0.0.1:1/".into())).unwrap();
        let err = client.get_block_height().await.unwrap_err();
        assert!(matches!(err, PipelineError::Transport(_)), "got {err:?}");
    }
}
