//! Reference authority server.
//!
//! # Responsibilities
//! - Serve the authority HTTP surface used by [`AuthorityClient`](crate::authority::AuthorityClient)
//! - Verify `x-request-signature` against the claimed wallet on every request
//! - Prepare through a [`LocalPreparer`] and co-sign the mint server-side
//! - Broadcast each pending id at most once; repeats get the original result
//! - Keep a per-wallet transaction history

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::auth::{verify_auth_signature, AuthCredential, AUTH_HEADER};
use crate::authority::client::{
    BuyRequest, CreateAndBuyRequest, ErrorBody, PrepareResponse, SellRequest,
    SubmitSignedRequest, SubmitSignedResponse,
};
use crate::authority::ledger::{PendingEntry, PendingLedger};
use crate::blockchain::client::NetworkClient;
use crate::blockchain::transaction::WireTransaction;
use crate::blockchain::types::Pubkey;
use crate::error::{ErrorKind, PipelineError};
use crate::pipeline::cosigner;
use crate::pipeline::preparer::{LocalPreparer, TransactionPreparer};
use crate::pipeline::submitter::DirectSubmitter;
use crate::pipeline::types::{Intent, PendingId, SellAmount, SignedTransaction};
use crate::resilience::retries::RetryPolicy;

/// Error response: status plus an [`ErrorBody`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::message(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match e.kind() {
            ErrorKind::InsufficientInput => StatusCode::BAD_REQUEST,
            ErrorKind::AuthUnavailable => StatusCode::UNAUTHORIZED,
            ErrorKind::StaleState => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::AlreadyInFlight => StatusCode::LOCKED,
            ErrorKind::AlreadyProcessedAmbiguous => StatusCode::CONFLICT,
            ErrorKind::RetriesExhausted => StatusCode::BAD_GATEWAY,
            ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Fatal => match e {
                PipelineError::Signing(_)
                | PipelineError::InvalidTransaction(_)
                | PipelineError::Decode(_) => StatusCode::BAD_REQUEST,
                PipelineError::Rpc { .. } | PipelineError::Transport(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        Self {
            status,
            body: ErrorBody::from_error(&e),
        }
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    preparer: Arc<LocalPreparer>,
    submitter: Arc<DirectSubmitter>,
    ledger: Arc<PendingLedger>,
    history: Arc<DashMap<Pubkey, Vec<Value>>>,
}

pub struct AuthorityServer {
    router: Router,
    ledger: Arc<PendingLedger>,
}

impl AuthorityServer {
    pub fn new(preparer: LocalPreparer, network: Arc<dyn NetworkClient>, retry: RetryPolicy) -> Self {
        Self::with_ledger(preparer, network, retry, Arc::new(PendingLedger::new()))
    }

    /// Server over an existing ledger, e.g. one with configured retention.
    pub fn with_ledger(
        preparer: LocalPreparer,
        network: Arc<dyn NetworkClient>,
        retry: RetryPolicy,
        ledger: Arc<PendingLedger>,
    ) -> Self {
        let state = AppState {
            preparer: Arc::new(preparer),
            submitter: Arc::new(DirectSubmitter::with_ledger(network, ledger.clone(), retry)),
            ledger: ledger.clone(),
            history: Arc::new(DashMap::new()),
        };
        Self {
            router: Self::build_router(state),
            ledger,
        }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/tokens/create-and-buy", post(create_and_buy))
            .route("/tokens/buy", post(buy))
            .route("/tokens/sell", post(sell))
            .route("/tokens/{pending_id}/submit-signed", post(submit_signed))
            .route("/transactions/{wallet}", get(history))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn ledger(&self) -> &Arc<PendingLedger> {
        &self.ledger
    }

    /// Serve until the listener fails.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Authority server starting");
        axum::serve(listener, self.router).await?;
        tracing::info!("Authority server stopped");
        Ok(())
    }
}

/// Verify the request signature for `wallet_address`.
fn authenticate(headers: &HeaderMap, wallet_address: &str) -> Result<AuthCredential, ApiError> {
    let signature = headers
        .get(AUTH_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing request signature"))?;
    let wallet: Pubkey = wallet_address
        .parse()
        .map_err(|e: PipelineError| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    verify_auth_signature(&wallet, signature)
        .map_err(|e| ApiError::new(StatusCode::UNAUTHORIZED, e.to_string()))?;

    Ok(AuthCredential {
        wallet_address: wallet,
        signature: signature.to_string(),
        issued_at: SystemTime::now(),
    })
}

async fn prepare(state: &AppState, intent: Intent, credential: AuthCredential) -> ApiResult<PrepareResponse> {
    let prepared = state.preparer.prepare(&intent, &credential).await?;
    let tx = cosigner::co_sign(&prepared)?;

    state.ledger.insert(
        prepared.pending_id.clone(),
        PendingEntry::prepared(intent.kind(), credential.wallet_address, tx.message().to_vec()),
    );

    Ok(Json(PrepareResponse {
        transaction: tx.to_base64(),
        pending_transaction_id: prepared.pending_id.to_string(),
        token_mint: prepared.auxiliary_mint.map(|m| m.to_string()),
        sol_amount: prepared.quote.map(|q| q.sol_amount),
        token_amount: prepared.quote.map(|q| q.token_amount),
        min_output: prepared.quote.and_then(|q| q.min_output),
        last_valid_block_height: prepared.blockhash.map(|b| b.last_valid_block_height),
    }))
}

async fn create_and_buy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateAndBuyRequest>,
) -> ApiResult<PrepareResponse> {
    let credential = authenticate(&headers, &request.wallet_address)?;
    let intent = Intent::CreateToken {
        name: request.name,
        symbol: request.symbol,
        uri: request.uri,
        initial_buy_lamports: Some(request.sol_amount),
        slippage_bps: Some(request.slippage_bps),
    };
    prepare(&state, intent, credential).await
}

async fn buy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BuyRequest>,
) -> ApiResult<PrepareResponse> {
    let credential = authenticate(&headers, &request.wallet_address)?;
    let intent = Intent::Buy {
        mint: request.token_mint.parse()?,
        lamports: request.sol_amount,
        slippage_bps: request.slippage_bps,
    };
    prepare(&state, intent, credential).await
}

async fn sell(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SellRequest>,
) -> ApiResult<PrepareResponse> {
    let credential = authenticate(&headers, &request.wallet_address)?;
    let amount = match (request.token_amount, request.percentage) {
        (Some(tokens), None) => SellAmount::Tokens(tokens),
        (None, Some(100)) => SellAmount::All,
        (None, Some(percent)) => SellAmount::Percent(percent),
        _ => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "exactly one of tokenAmount and percentage is required",
            ));
        }
    };
    let intent = Intent::Sell {
        mint: request.token_mint.parse()?,
        amount,
        slippage_bps: request.slippage_bps,
    };
    prepare(&state, intent, credential).await
}

async fn submit_signed(
    State(state): State<AppState>,
    Path(pending_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SubmitSignedRequest>,
) -> ApiResult<SubmitSignedResponse> {
    let credential = authenticate(&headers, &request.wallet_address)?;
    let pending_id = PendingId::from(pending_id);

    let handle = state
        .ledger
        .get(&pending_id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("unknown pending transaction {pending_id}")))?;

    let tx = WireTransaction::from_base64(&request.signed_transaction)?;
    let kind = {
        let entry = handle.lock().await;
        if entry.wallet != Some(credential.wallet_address) {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "pending transaction belongs to another wallet",
            ));
        }
        if entry.message.as_deref() != Some(tx.message()) {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "signed transaction does not match the prepared transaction",
            ));
        }
        entry.kind
    };
    tx.verify_complete()?;

    let signature = tx
        .primary_signature()
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "fee payer signature missing"))?;
    let signed = SignedTransaction {
        pending_id: pending_id.clone(),
        bytes: tx.to_bytes(),
        signature,
    };

    tracing::info!(pending_id = %pending_id, use_jito = request.use_jito, "Submitting signed transaction");
    let receipt = state.submitter.broadcast_once(&signed).await?;

    let mut records = state.history.entry(credential.wallet_address).or_default();
    if !records.iter().any(|r| r["pendingTransactionId"] == pending_id.as_str()) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        records.push(json!({
            "pendingTransactionId": pending_id.as_str(),
            "transactionSignature": receipt.signature.to_string(),
            "type": kind,
            "status": receipt.status,
            "timestamp": timestamp,
        }));
    }

    Ok(Json(SubmitSignedResponse {
        transaction_signature: receipt.signature.to_string(),
        status: receipt.status,
        pending_transaction_id: receipt.pending_id.to_string(),
    }))
}

async fn history(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Vec<Value>> {
    let credential = authenticate(&headers, &wallet)?;
    let records = state
        .history
        .get(&credential.wallet_address)
        .map(|r| r.value().clone())
        .unwrap_or_default();
    Ok(Json(records))
}
