//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, optional env overrides)
//!     → validation.rs (semantic checks)
//!     → PipelineConfig (validated, immutable)
//!     → handed to TransactionPipeline::from_config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_with_env, ConfigError};
pub use schema::{
    AuthorityConfig, Commitment, ConfirmationConfig, InFlightConfig, LedgerConfig, MintConfig,
    ObservabilityConfig, PipelineConfig, PrepareConfig, RetryConfig, RpcConfig,
};
