//! Transaction pipeline orchestration.
//!
//! # Flow
//! ```text
//! Authenticator (session credential)
//!     → TransactionPreparer (intent guard held)
//!     → cosigner (local co-signers, then wallet)
//!     → Submitter (pending id guard held)
//!     → ConfirmationWatcher
//! ```
//!
//! Every run gets a [`FlowId`]. Its transitions go to the flow's own
//! `watch` channel and, tagged with the id, to the pipeline-wide one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::Authenticator;
use crate::authority::client::AuthorityClient;
use crate::blockchain::client::{NetworkClient, SolanaRpcClient};
use crate::blockchain::transaction::WireTransaction;
use crate::blockchain::types::{BlockhashContext, SignatureStatus, TxSignature};
use crate::blockchain::wallet::ExternalWallet;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::authority::ledger::{PendingLedger, Retention};
use crate::pipeline::cosigner;
use crate::pipeline::inflight::InFlightGuard;
use crate::pipeline::mint::mint_source_from_config;
use crate::pipeline::preparer::{LocalPreparer, RemotePreparer, TransactionPreparer};
use crate::pipeline::submitter::{AuthoritySubmitter, DirectSubmitter, Submitter};
use crate::pipeline::types::{FlowId, FlowUpdate, Intent, SignedTransaction, SubmissionResult, TxState};
use crate::pipeline::watcher::ConfirmationWatcher;
use crate::program::OnChainProgramClient;
use crate::resilience::retries::{with_retry, RetryPolicy};

/// Collaborators of a [`TransactionPipeline`].
pub struct PipelineComponents {
    pub network: Arc<dyn NetworkClient>,
    pub preparer: Arc<dyn TransactionPreparer>,
    pub submitter: Arc<dyn Submitter>,
}

/// A flow running on its own task.
#[derive(Debug)]
pub struct FlowHandle {
    flow: FlowId,
    states: watch::Receiver<TxState>,
    task: JoinHandle<Result<SubmissionResult>>,
}

impl FlowHandle {
    pub fn id(&self) -> FlowId {
        self.flow
    }

    /// Transitions of this flow only.
    pub fn states(&self) -> watch::Receiver<TxState> {
        self.states.clone()
    }

    /// Wait for the flow's outcome. `Err` only if the task panicked or was aborted.
    pub async fn join(self) -> std::result::Result<Result<SubmissionResult>, tokio::task::JoinError> {
        self.task.await
    }
}

/// Publishes one flow's transitions.
struct FlowReporter {
    flow: FlowId,
    states: watch::Sender<TxState>,
}

pub struct TransactionPipeline {
    authenticator: Authenticator,
    network: Arc<dyn NetworkClient>,
    preparer: Arc<dyn TransactionPreparer>,
    submitter: Arc<dyn Submitter>,
    watcher: ConfirmationWatcher,
    inflight: InFlightGuard,
    retry: RetryPolicy,
    confirmation_timeout: Duration,
    updates: watch::Sender<FlowUpdate>,
    next_flow: AtomicU64,
}

impl TransactionPipeline {
    pub fn new(components: PipelineComponents, config: &PipelineConfig) -> Self {
        let retry = RetryPolicy::from_config(&config.retries);
        let watcher = ConfirmationWatcher::from_config(
            components.network.clone(),
            retry.clone(),
            &config.confirmation,
            config.rpc.commitment,
        );
        let (updates, _) = watch::channel(FlowUpdate {
            flow: FlowId::NONE,
            state: TxState::Idle,
        });

        Self {
            authenticator: Authenticator::new(),
            network: components.network,
            preparer: components.preparer,
            submitter: components.submitter,
            watcher,
            inflight: InFlightGuard::new(Duration::from_secs(config.inflight.abandon_after_secs)),
            retry,
            confirmation_timeout: Duration::from_secs(config.confirmation.timeout_secs),
            updates,
            next_flow: AtomicU64::new(1),
        }
    }

    /// Pipeline that prepares and submits through the authority.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retries);
        let network: Arc<dyn NetworkClient> = Arc::new(SolanaRpcClient::new(&config.rpc)?);
        let authority = Arc::new(AuthorityClient::new(&config.authority)?);

        tracing::info!(authority = %authority.base_url(), "Remote transaction pipeline configured");

        let components = PipelineComponents {
            network,
            preparer: Arc::new(RemotePreparer::new(authority.clone(), retry.clone(), &config.prepare)),
            submitter: Arc::new(AuthoritySubmitter::new(authority, retry, config.authority.use_jito)),
        };
        Ok(Self::new(components, config))
    }

    /// Pipeline that builds transactions locally and broadcasts them directly.
    pub fn local_from_config(config: &PipelineConfig, program: Arc<dyn OnChainProgramClient>) -> Result<Self> {
        let network: Arc<dyn NetworkClient> = Arc::new(SolanaRpcClient::new(&config.rpc)?);
        Self::local(config, program, network)
    }

    /// Local pipeline over an existing network client.
    pub fn local(
        config: &PipelineConfig,
        program: Arc<dyn OnChainProgramClient>,
        network: Arc<dyn NetworkClient>,
    ) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retries);
        let preparer = LocalPreparer::new(program, network.clone(), retry.clone(), &config.prepare)
            .with_mint_source(mint_source_from_config(&config.mint)?);
        let ledger = Arc::new(PendingLedger::with_retention(Retention::from_config(&config.ledger)));
        let components = PipelineComponents {
            network: network.clone(),
            preparer: Arc::new(preparer),
            submitter: Arc::new(DirectSubmitter::with_ledger(network, ledger, retry)),
        };
        Ok(Self::new(components, config))
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Latest transition of any flow, tagged with the flow it belongs to.
    ///
    /// Concurrent flows overwrite each other here; use
    /// [`FlowHandle::states`] to follow a single flow.
    pub fn subscribe(&self) -> watch::Receiver<FlowUpdate> {
        self.updates.subscribe()
    }

    fn open_flow(&self) -> (FlowReporter, watch::Receiver<TxState>) {
        let flow = FlowId(self.next_flow.fetch_add(1, Ordering::Relaxed));
        let (states, receiver) = watch::channel(TxState::Idle);
        (FlowReporter { flow, states }, receiver)
    }

    fn publish(&self, reporter: &FlowReporter, state: TxState) {
        tracing::debug!(flow = %reporter.flow, state = ?state, "Pipeline state");
        reporter.states.send_replace(state.clone());
        self.updates.send_replace(FlowUpdate {
            flow: reporter.flow,
            state,
        });
    }

    /// Run one intent to a terminal status.
    ///
    /// A confirmed, failed or timed-out transaction is `Ok`; errors before
    /// a signature reached the network, and "already processed"
    /// ambiguities, are `Err`.
    pub async fn execute(&self, intent: Intent, wallet: Arc<dyn ExternalWallet>) -> Result<SubmissionResult> {
        let (reporter, _) = self.open_flow();
        self.execute_flow(&reporter, intent, wallet).await
    }

    /// Run [`execute`](Self::execute) on its own task.
    ///
    /// Dropping the handle does not cancel the flow.
    pub fn spawn_execute(self: &Arc<Self>, intent: Intent, wallet: Arc<dyn ExternalWallet>) -> FlowHandle {
        let (reporter, states) = self.open_flow();
        let flow = reporter.flow;
        let pipeline = self.clone();
        let task = tokio::spawn(async move { pipeline.execute_flow(&reporter, intent, wallet).await });
        FlowHandle { flow, states, task }
    }

    async fn execute_flow(
        &self,
        reporter: &FlowReporter,
        intent: Intent,
        wallet: Arc<dyn ExternalWallet>,
    ) -> Result<SubmissionResult> {
        let result = self.run(reporter, &intent, wallet.as_ref()).await;
        match &result {
            Ok(outcome) => self.publish(reporter, TxState::from_result(outcome)),
            Err(e) => {
                tracing::warn!(flow = %reporter.flow, kind = intent.kind(), error = %e, "Pipeline flow aborted");
                self.publish(
                    reporter,
                    TxState::Aborted {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                );
            }
        }
        result
    }

    async fn run(&self, reporter: &FlowReporter, intent: &Intent, wallet: &dyn ExternalWallet) -> Result<SubmissionResult> {
        let credential = self.authenticator.ensure_credential(wallet).await?;
        let intent_ticket = self
            .inflight
            .acquire(format!("intent:{}", intent.fingerprint(&credential.wallet_address)))?;

        let prepared = self.preparer.prepare(intent, &credential).await?;
        let _pending_ticket = self.inflight.acquire(format!("pending:{}", prepared.pending_id))?;
        self.publish(
            reporter,
            TxState::Prepared {
                pending_id: prepared.pending_id.clone(),
            },
        );

        let signed = cosigner::sign(&prepared, wallet).await?;
        self.publish(
            reporter,
            TxState::Signed {
                pending_id: signed.pending_id.clone(),
                signature: signed.signature,
            },
        );

        let blockhash = match &prepared.blockhash {
            Some(context) => context.clone(),
            None => self.capture_blockhash(&signed).await?,
        };

        self.submitter.submit(&signed, &credential).await?;
        self.publish(
            reporter,
            TxState::Submitted {
                pending_id: signed.pending_id.clone(),
                signature: signed.signature,
            },
        );
        drop(intent_ticket);

        Ok(self
            .watcher
            .await_confirmation(&signed.signature, &signed.pending_id, &blockhash, self.confirmation_timeout)
            .await)
    }

    /// Blockhash context for a transaction prepared without one.
    ///
    /// Exact when the transaction uses the latest blockhash; otherwise the
    /// latest height is an upper bound for the older hash.
    async fn capture_blockhash(&self, signed: &SignedTransaction) -> Result<BlockhashContext> {
        let blockhash = WireTransaction::from_bytes(&signed.bytes)?.recent_blockhash()?;
        let latest = with_retry(&self.retry, "get_latest_blockhash", || self.network.get_latest_blockhash()).await?;
        if latest.blockhash != blockhash {
            tracing::debug!(
                blockhash = %blockhash,
                latest = %latest.blockhash,
                "Using latest last-valid height as an upper bound"
            );
        }
        Ok(BlockhashContext {
            blockhash,
            last_valid_block_height: latest.last_valid_block_height,
        })
    }

    /// Look up a signature, e.g. after `AlreadyProcessedAmbiguous`.
    pub async fn lookup_status(&self, signature: &TxSignature) -> Result<Option<SignatureStatus>> {
        with_retry(&self.retry, "get_signature_status", || self.network.get_signature_status(signature)).await
    }

    /// Resolve an ambiguous error to a status, if the error carries a signature.
    pub async fn resolve_ambiguous(&self, error: &PipelineError) -> Result<Option<SignatureStatus>> {
        match error.root() {
            PipelineError::AlreadyProcessedAmbiguous { signature: Some(signature), .. } => {
                let signature: TxSignature = signature.parse()?;
                self.lookup_status(&signature).await
            }
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for TransactionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionPipeline")
            .field("in_flight", &self.inflight.len())
            .field("confirmation_timeout", &self.confirmation_timeout)
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}
