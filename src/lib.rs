//! Token transaction pipeline for a creator-token launchpad.
//!
//! A wallet, a backend authority and the on-chain program cooperate to
//! create, buy and sell tokens without the user's secret key leaving the
//! wallet, while tolerating RPC rate limiting and never executing one
//! logical action twice.

pub mod auth;
pub mod authority;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod program;
pub mod resilience;

pub use config::schema::PipelineConfig;
pub use error::{ErrorKind, PipelineError, Result};
pub use pipeline::{Intent, SellAmount, SubmissionResult, SubmissionStatus, TransactionPipeline, TxState};
