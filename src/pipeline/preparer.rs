//! Transaction preparation.
//!
//! # Responsibilities
//! - Turn an [`Intent`] into a [`PreparedTransaction`] with a fresh pending id
//! - Reject zero amounts before anything is signed
//! - Encode a slippage bound computed from fresh bonding-curve state
//!
//! Two implementations produce the same shape: [`RemotePreparer`] asks the
//! authority, [`LocalPreparer`] builds the transaction itself through an
//! [`OnChainProgramClient`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthCredential;
use crate::authority::client::{
    AuthorityClient, BuyRequest, CreateAndBuyRequest, PrepareResponse, SellRequest,
};
use crate::blockchain::client::NetworkClient;
use crate::blockchain::transaction::WireTransaction;
use crate::blockchain::types::{BlockhashContext, Pubkey};
use crate::config::PrepareConfig;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::mint::{MintKeySource, RandomMint};
use crate::pipeline::types::{Intent, PendingId, PreparedTransaction, SellAmount, TradeQuote};
use crate::program::{
    min_output, BondingCurveSnapshot, BuyParams, CreateTokenParams, OnChainProgramClient,
    SellParams,
};
use crate::resilience::retries::{with_retry, RetryPolicy};

#[async_trait]
pub trait TransactionPreparer: Send + Sync {
    /// Prepare `intent` for the credential's wallet.
    async fn prepare(&self, intent: &Intent, credential: &AuthCredential) -> Result<PreparedTransaction>;
}

fn check_create_fields(name: &str, symbol: &str, uri: &str) -> Result<()> {
    for (field, value) in [("name", name), ("symbol", symbol), ("uri", uri)] {
        if value.trim().is_empty() {
            return Err(PipelineError::InsufficientInput(format!("token {field} is empty")));
        }
    }
    Ok(())
}

fn check_percent(percent: u8) -> Result<()> {
    if percent == 0 || percent > 100 {
        return Err(PipelineError::InsufficientInput(format!(
            "sell percentage {percent} is outside 1..=100"
        )));
    }
    Ok(())
}

/// Prepares through the authority's HTTP API.
#[derive(Debug, Clone)]
pub struct RemotePreparer {
    authority: Arc<AuthorityClient>,
    retry: RetryPolicy,
    default_slippage_bps: u16,
}

impl RemotePreparer {
    pub fn new(authority: Arc<AuthorityClient>, retry: RetryPolicy, config: &PrepareConfig) -> Self {
        Self {
            authority,
            retry,
            default_slippage_bps: config.default_slippage_bps,
        }
    }

    async fn request(&self, intent: &Intent, credential: &AuthCredential) -> Result<PrepareResponse> {
        let wallet_address = credential.wallet_address.to_string();
        match intent {
            Intent::CreateToken { name, symbol, uri, initial_buy_lamports, slippage_bps } => {
                check_create_fields(name, symbol, uri)?;
                let request = CreateAndBuyRequest {
                    name: name.clone(),
                    symbol: symbol.clone(),
                    uri: uri.clone(),
                    sol_amount: initial_buy_lamports.unwrap_or(0),
                    wallet_address,
                    slippage_bps: slippage_bps.unwrap_or(self.default_slippage_bps),
                };
                with_retry(&self.retry, "authority_create_and_buy", || {
                    self.authority.create_and_buy(&request, credential)
                })
                .await
            }
            Intent::Buy { mint, lamports, slippage_bps } => {
                if *lamports == 0 {
                    return Err(PipelineError::InsufficientInput("buy amount is zero".into()));
                }
                let request = BuyRequest {
                    token_mint: mint.to_string(),
                    sol_amount: *lamports,
                    wallet_address,
                    slippage_bps: *slippage_bps,
                };
                with_retry(&self.retry, "authority_buy", || self.authority.buy(&request, credential)).await
            }
            Intent::Sell { mint, amount, slippage_bps } => {
                let (token_amount, percentage) = match amount {
                    SellAmount::Tokens(0) => {
                        return Err(PipelineError::InsufficientInput("sell amount is zero".into()));
                    }
                    SellAmount::Tokens(n) => (Some(*n), None),
                    SellAmount::All => (None, Some(100)),
                    SellAmount::Percent(p) => {
                        check_percent(*p)?;
                        (None, Some(*p))
                    }
                };
                let request = SellRequest {
                    token_mint: mint.to_string(),
                    token_amount,
                    percentage,
                    wallet_address,
                    slippage_bps: *slippage_bps,
                };
                with_retry(&self.retry, "authority_sell", || self.authority.sell(&request, credential)).await
            }
        }
    }
}

#[async_trait]
impl TransactionPreparer for RemotePreparer {
    async fn prepare(&self, intent: &Intent, credential: &AuthCredential) -> Result<PreparedTransaction> {
        let result: Result<PreparedTransaction> = async {
            let response = self.request(intent, credential).await?;
            let blob = BASE64.decode(response.transaction.trim())?;
            // Fail early on a blob that is not a transaction at all.
            let tx = WireTransaction::from_bytes(&blob)?;

            let auxiliary_mint = match &response.token_mint {
                Some(mint) => Some(mint.parse::<Pubkey>()?),
                None => None,
            };
            let blockhash = match response.last_valid_block_height {
                Some(height) => Some(BlockhashContext {
                    blockhash: tx.recent_blockhash()?,
                    last_valid_block_height: height,
                }),
                None => None,
            };
            let quote = match (response.sol_amount, response.token_amount) {
                (Some(sol_amount), Some(token_amount)) => Some(TradeQuote {
                    sol_amount,
                    token_amount,
                    min_output: response.min_output,
                }),
                _ => None,
            };

            Ok(PreparedTransaction {
                intent: intent.clone(),
                unsigned_blob: blob,
                pending_id: PendingId::from(response.pending_transaction_id),
                auxiliary_mint,
                co_signers: Vec::new(),
                blockhash,
                quote,
            })
        }
        .await;

        metrics::record_prepare(intent.kind(), result.is_ok());
        if let Ok(prepared) = &result {
            tracing::info!(
                kind = intent.kind(),
                pending_id = %prepared.pending_id,
                "Transaction prepared by authority"
            );
        }
        result
    }
}

/// Prepares locally against the on-chain program.
pub struct LocalPreparer {
    program: Arc<dyn OnChainProgramClient>,
    network: Arc<dyn NetworkClient>,
    retry: RetryPolicy,
    max_state_age: Duration,
    default_slippage_bps: u16,
    mint_source: Arc<dyn MintKeySource>,
}

impl LocalPreparer {
    pub fn new(
        program: Arc<dyn OnChainProgramClient>,
        network: Arc<dyn NetworkClient>,
        retry: RetryPolicy,
        config: &PrepareConfig,
    ) -> Self {
        Self {
            program,
            network,
            retry,
            max_state_age: Duration::from_millis(config.max_state_age_ms),
            default_slippage_bps: config.default_slippage_bps,
            mint_source: Arc::new(RandomMint),
        }
    }

    /// Draw created tokens' mint keypairs from `source` instead of at random.
    pub fn with_mint_source(mut self, source: Arc<dyn MintKeySource>) -> Self {
        self.mint_source = source;
        self
    }

    async fn fetch_curve(&self, mint: &Pubkey) -> Result<BondingCurveSnapshot> {
        with_retry(&self.retry, "fetch_curve", || self.program.fetch_curve(mint)).await
    }

    /// Curve state no older than the staleness bound, re-fetched at most once.
    async fn fresh_curve(&self, mint: &Pubkey) -> Result<BondingCurveSnapshot> {
        let curve = self.fetch_curve(mint).await?;
        if curve.age() <= self.max_state_age {
            return Ok(curve);
        }
        tracing::debug!(mint = %mint, age_ms = curve.age().as_millis() as u64, "Curve state stale, refetching");

        let curve = self.fetch_curve(mint).await?;
        let age = curve.age();
        if age <= self.max_state_age {
            return Ok(curve);
        }
        Err(PipelineError::StaleState {
            age_ms: age.as_millis() as u64,
            max_age_ms: self.max_state_age.as_millis() as u64,
        })
    }

    async fn latest_blockhash(&self) -> Result<BlockhashContext> {
        with_retry(&self.retry, "get_latest_blockhash", || self.network.get_latest_blockhash()).await
    }

    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<u64> {
        with_retry(&self.retry, "get_token_balance", || self.network.get_token_balance(owner, mint)).await
    }

    async fn sell_amount(&self, owner: &Pubkey, mint: &Pubkey, amount: SellAmount) -> Result<u64> {
        let amount = match amount {
            SellAmount::Tokens(n) => n,
            SellAmount::All => self.token_balance(owner, mint).await?,
            SellAmount::Percent(p) => {
                check_percent(p)?;
                let balance = self.token_balance(owner, mint).await?;
                (u128::from(balance) * u128::from(p) / 100) as u64
            }
        };
        if amount == 0 {
            return Err(PipelineError::InsufficientInput("no tokens to sell".into()));
        }
        Ok(amount)
    }

    async fn build(&self, intent: &Intent, payer: Pubkey) -> Result<PreparedTransaction> {
        let pending_id = PendingId::generate();

        match intent {
            Intent::CreateToken { name, symbol, uri, initial_buy_lamports, slippage_bps } => {
                check_create_fields(name, symbol, uri)?;
                let mint = self.mint_source.next_mint().await?;
                let mint_address = mint.pubkey();

                let (initial_buy, quote) = match initial_buy_lamports {
                    Some(lamports) if *lamports > 0 => {
                        let curve = self.program.initial_curve(&mint_address);
                        let expected = self.program.quote_buy(&curve, *lamports)?;
                        let slippage_bps = slippage_bps.unwrap_or(self.default_slippage_bps);
                        let min_tokens_out = min_output(expected, slippage_bps)?;
                        (
                            Some((*lamports, min_tokens_out)),
                            Some(TradeQuote {
                                sol_amount: *lamports,
                                token_amount: expected,
                                min_output: Some(min_tokens_out),
                            }),
                        )
                    }
                    _ => (None, None),
                };

                let blockhash = self.latest_blockhash().await?;
                let params = CreateTokenParams {
                    creator: payer,
                    mint: mint_address,
                    name: name.clone(),
                    symbol: symbol.clone(),
                    uri: uri.clone(),
                    initial_buy,
                };
                let blob = self.program.build_create(&params, &blockhash).await?;

                Ok(PreparedTransaction {
                    intent: intent.clone(),
                    unsigned_blob: blob,
                    pending_id,
                    auxiliary_mint: Some(mint_address),
                    co_signers: vec![mint],
                    blockhash: Some(blockhash),
                    quote,
                })
            }
            Intent::Buy { mint, lamports, slippage_bps } => {
                if *lamports == 0 {
                    return Err(PipelineError::InsufficientInput("buy amount is zero".into()));
                }
                let curve = self.fresh_curve(mint).await?;
                let expected = self.program.quote_buy(&curve, *lamports)?;
                let min_tokens_out = min_output(expected, *slippage_bps)?;

                let blockhash = self.latest_blockhash().await?;
                let params = BuyParams {
                    buyer: payer,
                    mint: *mint,
                    lamports: *lamports,
                    min_tokens_out,
                };
                let blob = self.program.build_buy(&params, &blockhash).await?;

                Ok(PreparedTransaction {
                    intent: intent.clone(),
                    unsigned_blob: blob,
                    pending_id,
                    auxiliary_mint: None,
                    co_signers: Vec::new(),
                    blockhash: Some(blockhash),
                    quote: Some(TradeQuote {
                        sol_amount: *lamports,
                        token_amount: expected,
                        min_output: Some(min_tokens_out),
                    }),
                })
            }
            Intent::Sell { mint, amount, slippage_bps } => {
                let token_amount = self.sell_amount(&payer, mint, *amount).await?;
                let curve = self.fresh_curve(mint).await?;
                let expected = self.program.quote_sell(&curve, token_amount)?;
                let min_sol_out = min_output(expected, *slippage_bps)?;

                let blockhash = self.latest_blockhash().await?;
                let params = SellParams {
                    seller: payer,
                    mint: *mint,
                    token_amount,
                    min_sol_out,
                };
                let blob = self.program.build_sell(&params, &blockhash).await?;

                Ok(PreparedTransaction {
                    intent: intent.clone(),
                    unsigned_blob: blob,
                    pending_id,
                    auxiliary_mint: None,
                    co_signers: Vec::new(),
                    blockhash: Some(blockhash),
                    quote: Some(TradeQuote {
                        sol_amount: expected,
                        token_amount,
                        min_output: Some(min_sol_out),
                    }),
                })
            }
        }
    }
}

#[async_trait]
impl TransactionPreparer for LocalPreparer {
    async fn prepare(&self, intent: &Intent, credential: &AuthCredential) -> Result<PreparedTransaction> {
        let result = self.build(intent, credential.wallet_address).await;
        metrics::record_prepare(intent.kind(), result.is_ok());
        match &result {
            Ok(prepared) => tracing::info!(
                kind = intent.kind(),
                pending_id = %prepared.pending_id,
                mint = ?prepared.auxiliary_mint,
                "Transaction prepared"
            ),
            Err(e) => tracing::warn!(kind = intent.kind(), error = %e, "Preparation failed"),
        }
        result
    }
}

impl std::fmt::Debug for LocalPreparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPreparer")
            .field("max_state_age", &self.max_state_age)
            .field("default_slippage_bps", &self.default_slippage_bps)
            .finish_non_exhaustive()
    }
}
