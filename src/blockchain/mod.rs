//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! serialized transaction (base64 from the authority or program client)
//!     → transaction.rs (parse, locate signer slots, sign, verify)
//!     → wallet.rs (local keypairs, ExternalWallet seam)
//!     → client.rs (JSON-RPC broadcast, status, block height)
//! ```
//!
//! # Security Constraints
//! - Secret keys only from the host or environment variables
//! - Never log secret keys or auth signatures
//! - All RPC calls have configurable timeouts

pub mod client;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::{NetworkClient, SolanaRpcClient};
pub use transaction::WireTransaction;
pub use types::{BlockhashContext, Pubkey, SignatureStatus, TxSignature};
pub use wallet::{ExternalWallet, Keypair, LocalWallet};
