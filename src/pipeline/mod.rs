//! The token transaction pipeline.
//!
//! # Data Flow
//! ```text
//! Intent
//!     → preparer.rs (remote authority or local program client)
//!     → cosigner.rs (mint keypair from mint.rs, then the wallet)
//!     → submitter.rs (idempotent authority submit or guarded broadcast)
//!     → watcher.rs (signature status until terminal)
//!     → SubmissionResult
//! ```
//!
//! `orchestrator.rs` drives the flow and `inflight.rs` keeps two attempts
//! of the same action from running at once.

pub mod cosigner;
pub mod inflight;
pub mod mint;
pub mod orchestrator;
pub mod preparer;
pub mod submitter;
pub mod types;
pub mod watcher;

pub use inflight::{InFlightGuard, InFlightTicket};
pub use mint::{mint_source_from_config, MintKeySource, RandomMint, VanityMintPool};
pub use orchestrator::{FlowHandle, PipelineComponents, TransactionPipeline};
pub use preparer::{LocalPreparer, RemotePreparer, TransactionPreparer};
pub use submitter::{AuthoritySubmitter, DirectSubmitter, Submitter};
pub use types::{
    FlowId, FlowUpdate, Intent, PendingId, PreparedTransaction, SellAmount, SignedTransaction, SubmissionResult,
    SubmissionStatus, SubmitReceipt, TradeQuote, TxState,
};
pub use watcher::ConfirmationWatcher;
