//! Shared fakes and helpers for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use launchpad_tx::auth::{build_auth_message, AuthCredential};
use launchpad_tx::authority::{AuthorityClient, AuthorityServer};
use launchpad_tx::blockchain::client::NetworkClient;
use launchpad_tx::blockchain::transaction::{compile_legacy_message, CompiledInstruction, WireTransaction};
use launchpad_tx::blockchain::types::{BlockhashContext, Commitment, Pubkey, SignatureStatus, TxSignature};
use launchpad_tx::blockchain::wallet::{Keypair, LocalWallet};
use launchpad_tx::config::PipelineConfig;
use launchpad_tx::error::{PipelineError, Result};
use launchpad_tx::pipeline::{
    AuthoritySubmitter, LocalPreparer, PipelineComponents, RemotePreparer, TransactionPipeline,
};
use launchpad_tx::program::{
    BondingCurveSnapshot, BuyParams, CreateTokenParams, OnChainProgramClient, SellParams,
};
use launchpad_tx::resilience::RetryPolicy;

pub const START_HEIGHT: u64 = 100;
pub const LAST_VALID_HEIGHT: u64 = 250;

/// Pipeline config with short delays.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retries.max_attempts = 3;
    config.retries.base_delay_ms = 5;
    config.confirmation.poll_interval_ms = 5;
    config.confirmation.timeout_secs = 5;
    config.authority.timeout_secs = 5;
    config
}

pub fn test_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5))
}

/// In-memory network.
///
/// Broadcast transactions "land" unless told otherwise and reach
/// `confirmed` after `confirm_after_polls` status reads.
pub struct FakeRpc {
    pub blockhash: [u8; 32],
    pub last_valid_block_height: AtomicU64,
    pub block_height: AtomicU64,
    pub height_step: AtomicU64,
    pub confirm_after_polls: AtomicU32,
    pub land_transactions: AtomicBool,
    pub fail_on_chain: AtomicBool,
    pub already_processed: AtomicBool,
    /// Errors returned by the next sends; `true` means the send landed anyway.
    pub send_errors: Mutex<VecDeque<(PipelineError, bool)>>,
    /// Number of upcoming status reads that answer 429.
    pub read_rate_limits: AtomicU32,
    pub token_balance: AtomicU64,
    pub sends: AtomicU32,
    pub status_polls: AtomicU32,
    pub sent_bytes: Mutex<Vec<Vec<u8>>>,
    landed: DashMap<TxSignature, u32>,
}

impl FakeRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            blockhash: [7u8; 32],
            last_valid_block_height: AtomicU64::new(LAST_VALID_HEIGHT),
            block_height: AtomicU64::new(START_HEIGHT),
            height_step: AtomicU64::new(1),
            confirm_after_polls: AtomicU32::new(2),
            land_transactions: AtomicBool::new(true),
            fail_on_chain: AtomicBool::new(false),
            already_processed: AtomicBool::new(false),
            send_errors: Mutex::new(VecDeque::new()),
            read_rate_limits: AtomicU32::new(0),
            token_balance: AtomicU64::new(0),
            sends: AtomicU32::new(0),
            status_polls: AtomicU32::new(0),
            sent_bytes: Mutex::new(Vec::new()),
            landed: DashMap::new(),
        })
    }

    pub fn fail_next_send(&self, error: PipelineError, landed: bool) {
        self.send_errors.lock().unwrap().push_back((error, landed));
    }

    pub fn has_landed(&self, signature: &TxSignature) -> bool {
        self.landed.contains_key(signature)
    }

    pub fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkClient for FakeRpc {
    async fn get_latest_blockhash(&self) -> Result<BlockhashContext> {
        Ok(BlockhashContext {
            blockhash: bs58::encode(self.blockhash).into_string(),
            last_valid_block_height: self.last_valid_block_height.load(Ordering::SeqCst),
        })
    }

    async fn get_block_height(&self) -> Result<u64> {
        let step = self.height_step.load(Ordering::SeqCst);
        Ok(self.block_height.fetch_add(step, Ordering::SeqCst) + step)
    }

    async fn get_signature_status(&self, signature: &TxSignature) -> Result<Option<SignatureStatus>> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        if self
            .read_rate_limits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PipelineError::Rpc {
                status: Some(429),
                message: "Too Many Requests".into(),
            });
        }

        let Some(mut polls) = self.landed.get_mut(signature) else {
            return Ok(None);
        };
        *polls += 1;

        let err = self
            .fail_on_chain
            .load(Ordering::SeqCst)
            .then(|| serde_json::json!({"InstructionError": [0, {"Custom": 6002}]}));
        let confirmed = *polls >= self.confirm_after_polls.load(Ordering::SeqCst);
        Ok(Some(SignatureStatus {
            slot: 1_000,
            confirmations: Some(if confirmed { 1 } else { 0 }),
            err,
            confirmation_status: Some(if confirmed {
                Commitment::Confirmed
            } else {
                Commitment::Processed
            }),
        }))
    }

    async fn send_transaction(&self, transaction: &[u8]) -> Result<TxSignature> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.sent_bytes.lock().unwrap().push(transaction.to_vec());

        let tx = WireTransaction::from_bytes(transaction)?;
        tx.verify_complete()?;
        let signature = tx
            .primary_signature()
            .ok_or_else(|| PipelineError::Signing("unsigned".into()))?;

        if self.already_processed.load(Ordering::SeqCst) {
            return Err(PipelineError::AlreadyProcessedAmbiguous {
                signature: None,
                message: "Transaction simulation failed: This transaction has already been processed".into(),
            });
        }

        let injected = self.send_errors.lock().unwrap().pop_front();
        if let Some((error, landed)) = injected {
            if landed {
                self.landed.entry(signature).or_insert(0);
            }
            return Err(error);
        }

        if self.land_transactions.load(Ordering::SeqCst) {
            self.landed.entry(signature).or_insert(0);
        }
        Ok(signature)
    }

    async fn get_balance(&self, _account: &Pubkey) -> Result<u64> {
        Ok(5_000_000_000)
    }

    async fn get_token_balance(&self, _owner: &Pubkey, _mint: &Pubkey) -> Result<u64> {
        Ok(self.token_balance.load(Ordering::SeqCst))
    }
}

/// Transactions requested from [`FakeProgram`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Built {
    Create(CreateTokenParams),
    Buy(BuyParams),
    Sell(SellParams),
}

/// Constant-product curve with a recorded build log.
pub struct FakeProgram {
    pub program_id: Pubkey,
    pub virtual_sol: u64,
    pub virtual_token: u64,
    /// Number of upcoming fetches that return 10s old state.
    pub stale_fetches: AtomicU32,
    pub fetch_delay_ms: AtomicU64,
    pub fetches: AtomicU32,
    pub builds: Mutex<Vec<Built>>,
}

impl FakeProgram {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            program_id: Pubkey::new([42u8; 32]),
            virtual_sol: 30_000_000_000,
            virtual_token: 1_073_000_000_000_000,
            stale_fetches: AtomicU32::new(0),
            fetch_delay_ms: AtomicU64::new(0),
            fetches: AtomicU32::new(0),
            builds: Mutex::new(Vec::new()),
        })
    }

    pub fn builds(&self) -> Vec<Built> {
        self.builds.lock().unwrap().clone()
    }

    fn snapshot(&self, mint: &Pubkey, observed_at: Instant) -> BondingCurveSnapshot {
        BondingCurveSnapshot {
            mint: *mint,
            virtual_sol_reserves: self.virtual_sol,
            virtual_token_reserves: self.virtual_token,
            real_token_reserves: self.virtual_token / 2,
            complete: false,
            observed_at,
        }
    }

    fn message(&self, signers: &[Pubkey], blockhash: &BlockhashContext, data: Vec<u8>) -> Result<Vec<u8>> {
        let hash: [u8; 32] = bs58::decode(&blockhash.blockhash)
            .into_vec()
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| PipelineError::Decode("bad blockhash".into()))?;
        let instruction = CompiledInstruction {
            program_id_index: signers.len() as u8,
            accounts: (0..signers.len() as u8).collect(),
            data,
        };
        let message = compile_legacy_message(signers, &[], &[self.program_id], &hash, &[instruction]);
        Ok(WireTransaction::unsigned(message)?.to_bytes())
    }
}

fn encode(tag: u8, amounts: &[u64]) -> Vec<u8> {
    let mut data = vec![tag];
    for amount in amounts {
        data.extend_from_slice(&amount.to_le_bytes());
    }
    data
}

#[async_trait]
impl OnChainProgramClient for FakeProgram {
    async fn fetch_curve(&self, mint: &Pubkey) -> Result<BondingCurveSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let stale = self
            .stale_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let observed_at = if stale {
            Instant::now().checked_sub(Duration::from_secs(10)).unwrap_or_else(Instant::now)
        } else {
            Instant::now()
        };
        Ok(self.snapshot(mint, observed_at))
    }

    fn initial_curve(&self, mint: &Pubkey) -> BondingCurveSnapshot {
        self.snapshot(mint, Instant::now())
    }

    fn quote_buy(&self, curve: &BondingCurveSnapshot, lamports: u64) -> Result<u64> {
        let k = u128::from(curve.virtual_sol_reserves) * u128::from(curve.virtual_token_reserves);
        let new_sol = u128::from(curve.virtual_sol_reserves) + u128::from(lamports);
        let new_token = k / new_sol + 1;
        Ok((u128::from(curve.virtual_token_reserves) - new_token) as u64)
    }

    fn quote_sell(&self, curve: &BondingCurveSnapshot, token_amount: u64) -> Result<u64> {
        let k = u128::from(curve.virtual_sol_reserves) * u128::from(curve.virtual_token_reserves);
        let new_token = u128::from(curve.virtual_token_reserves) + u128::from(token_amount);
        let new_sol = k / new_token + 1;
        Ok((u128::from(curve.virtual_sol_reserves) - new_sol) as u64)
    }

    async fn build_create(&self, params: &CreateTokenParams, blockhash: &BlockhashContext) -> Result<Vec<u8>> {
        self.builds.lock().unwrap().push(Built::Create(params.clone()));
        let (lamports, min_out) = params.initial_buy.unwrap_or((0, 0));
        self.message(&[params.creator, params.mint], blockhash, encode(0, &[lamports, min_out]))
    }

    async fn build_buy(&self, params: &BuyParams, blockhash: &BlockhashContext) -> Result<Vec<u8>> {
        self.builds.lock().unwrap().push(Built::Buy(params.clone()));
        self.message(&[params.buyer], blockhash, encode(1, &[params.lamports, params.min_tokens_out]))
    }

    async fn build_sell(&self, params: &SellParams, blockhash: &BlockhashContext) -> Result<Vec<u8>> {
        self.builds.lock().unwrap().push(Built::Sell(params.clone()));
        self.message(&[params.seller], blockhash, encode(2, &[params.token_amount, params.min_sol_out]))
    }
}

pub fn test_wallet() -> Arc<LocalWallet> {
    Arc::new(LocalWallet::new(Keypair::generate()))
}

/// Credential signed by `wallet`, as the authenticator would produce.
pub fn credential_for(wallet: &LocalWallet) -> AuthCredential {
    let keypair = wallet.keypair();
    let address = keypair.pubkey();
    let signature = keypair.sign(build_auth_message(&address).as_bytes());
    AuthCredential {
        wallet_address: address,
        signature: BASE64.encode(signature.as_bytes()),
        issued_at: std::time::SystemTime::now(),
    }
}

pub fn local_preparer(rpc: &Arc<FakeRpc>, program: &Arc<FakeProgram>) -> LocalPreparer {
    LocalPreparer::new(
        program.clone(),
        rpc.clone(),
        test_retry(),
        &test_config().prepare,
    )
}

/// Start the reference authority on an ephemeral port and return its base URL.
pub async fn spawn_authority(rpc: &Arc<FakeRpc>, program: &Arc<FakeProgram>) -> String {
    let server = AuthorityServer::new(local_preparer(rpc, program), rpc.clone(), test_retry());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });
    format!("http://{addr}")
}

pub fn authority_client(base_url: &str) -> Arc<AuthorityClient> {
    let mut config = test_config();
    config.authority.base_url = base_url.to_string();
    Arc::new(AuthorityClient::new(&config.authority).unwrap())
}

/// Pipeline talking to the authority at `base_url`, watching `rpc`.
pub fn remote_pipeline(base_url: &str, rpc: &Arc<FakeRpc>) -> TransactionPipeline {
    let config = test_config();
    let authority = authority_client(base_url);
    let components = PipelineComponents {
        network: rpc.clone(),
        preparer: Arc::new(RemotePreparer::new(authority.clone(), test_retry(), &config.prepare)),
        submitter: Arc::new(AuthoritySubmitter::new(authority, test_retry(), false)),
    };
    TransactionPipeline::new(components, &config)
}

pub fn local_pipeline(rpc: &Arc<FakeRpc>, program: &Arc<FakeProgram>) -> TransactionPipeline {
    TransactionPipeline::local(&test_config(), program.clone(), rpc.clone()).unwrap()
}
