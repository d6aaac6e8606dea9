//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the pipeline.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Default public mainnet RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Root configuration for the transaction pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Solana JSON-RPC settings.
    pub rpc: RpcConfig,

    /// Remote authority (backend) settings.
    pub authority: AuthorityConfig,

    /// Retry configuration for network calls.
    pub retries: RetryConfig,

    /// Transaction preparation settings.
    pub prepare: PrepareConfig,

    /// Confirmation polling settings.
    pub confirmation: ConfirmationConfig,

    /// In-flight guard settings.
    pub inflight: InFlightConfig,

    /// Pending transaction ledger retention.
    pub ledger: LedgerConfig,

    /// Mint keypairs for created tokens.
    pub mint: MintConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Commitment level a transaction must reach to count as confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

/// Solana JSON-RPC configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// JSON-RPC endpoint URL.
    pub url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// RPC request timeout in seconds.
    pub timeout_secs: u64,

    /// Commitment used for reads and confirmation.
    pub commitment: Commitment,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            failover_urls: Vec::new(),
            timeout_secs: 10,
            commitment: Commitment::Confirmed,
        }
    }
}

/// Remote authority configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Base URL the `/tokens/...` paths are appended to.
    pub base_url: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Ask the authority to route the broadcast through a bundle relay.
    pub use_jito: bool,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_secs: 30,
            use_jito: false,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,

    /// Base delay for linear backoff in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Preparation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrepareConfig {
    /// Maximum age of bonding-curve state used for amount calculation.
    pub max_state_age_ms: u64,

    /// Slippage tolerance applied when the caller does not specify one.
    pub default_slippage_bps: u16,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            max_state_age_ms: 5000,
            default_slippage_bps: 1000,
        }
    }
}

/// Confirmation polling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Interval between status polls in milliseconds.
    pub poll_interval_ms: u64,

    /// Overall confirmation timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            timeout_secs: 60,
        }
    }
}

/// In-flight guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InFlightConfig {
    /// Age after which an in-flight entry is considered abandoned.
    pub abandon_after_secs: u64,
}

impl Default for InFlightConfig {
    fn default() -> Self {
        Self {
            abandon_after_secs: 120,
        }
    }
}

/// Pending transaction ledger retention.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Age after which a prepared but never broadcast entry is dropped.
    pub unsubmitted_ttl_secs: u64,

    /// Age after which a broadcast entry and its receipt are dropped.
    pub receipt_ttl_secs: u64,

    /// Minimum time between two sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            unsubmitted_ttl_secs: 120,
            receipt_ttl_secs: 900,
            sweep_interval_secs: 30,
        }
    }
}

/// Mint keypair configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MintConfig {
    /// Base58 suffix every created mint address ends with. Random mints when unset.
    pub vanity_suffix: Option<String>,

    /// Number of suffix-matching keypairs kept ready.
    pub pool_size: usize,

    /// JSON file of pre-generated keypairs for the suffix.
    pub pool_file: Option<String>,
}

impl Default for MintConfig {
    fn default() -> Self {
        Self {
            vanity_suffix: None,
            pool_size: 8,
            pool_file: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}
