//! Keypairs and the wallet signing seam.
//!
//! # Security
//! - Secret keys are loaded only from environment variables or passed in by the host
//! - Keys are never logged or serialized
//! - The pipeline talks to wallets through [`ExternalWallet`] and never sees
//!   the user's secret key

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};

use crate::blockchain::transaction::WireTransaction;
use crate::blockchain::types::{Pubkey, TxSignature};
use crate::error::{PipelineError, Result};

/// Environment variable holding a base58 secret key for [`LocalWallet::from_env`].
pub const WALLET_SECRET_ENV_VAR: &str = "LAUNCHPAD_WALLET_SECRET";

/// An ed25519 keypair.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::from_bytes(&rand::random::<[u8; 32]>()),
        }
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    /// Parse a base58 secret.
    ///
    /// Accepts a 32-byte seed or the 64-byte `seed || pubkey` form exported
    /// by common wallets. In the 64-byte form the embedded public key must
    /// match the seed.
    pub fn from_base58(encoded: &str) -> Result<Self> {
        let bytes = bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|e| PipelineError::Signing(format!("Invalid secret key format: {e}")))?;

        match bytes.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                Ok(Self::from_secret_bytes(seed))
            }
            64 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes[..32]);
                let keypair = Self::from_secret_bytes(seed);
                if keypair.pubkey().as_bytes()[..] != bytes[32..] {
                    return Err(PipelineError::Signing(
                        "Invalid secret key format: embedded public key does not match".into(),
                    ));
                }
                Ok(keypair)
            }
            n => Err(PipelineError::Signing(format!(
                "Invalid secret key format: {n} bytes, expected 32 or 64"
            ))),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new(self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> TxSignature {
        TxSignature(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}

/// A wallet the user controls.
///
/// Implementations wrap a browser extension, hardware device or remote
/// signer. Each signing call may prompt the user and may be declined.
#[async_trait]
pub trait ExternalWallet: Send + Sync {
    /// Connected address, or `None` when disconnected.
    fn address(&self) -> Option<Pubkey>;

    /// Whether the wallet can sign arbitrary messages.
    fn can_sign_messages(&self) -> bool;

    /// Sign arbitrary bytes (used for authentication).
    async fn sign_message(&self, message: &[u8]) -> Result<TxSignature>;

    /// Add the wallet's signature to a serialized transaction and return it.
    ///
    /// Signatures already present must be preserved.
    async fn sign_transaction(&self, transaction: &[u8]) -> Result<Vec<u8>>;
}

/// Wallet backed by an in-process keypair.
#[derive(Debug, Clone)]
pub struct LocalWallet {
    keypair: Keypair,
}

impl LocalWallet {
    pub fn new(keypair: Keypair) -> Self {
        tracing::info!(address = %keypair.pubkey(), "Wallet initialized");
        Self { keypair }
    }

    pub fn from_base58(secret: &str) -> Result<Self> {
        Keypair::from_base58(secret).map(Self::new)
    }

    /// Load the secret key from `LAUNCHPAD_WALLET_SECRET`.
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var(WALLET_SECRET_ENV_VAR).map_err(|_| {
            PipelineError::Config(format!("Environment variable {WALLET_SECRET_ENV_VAR} not set"))
        })?;
        Self::from_base58(&secret)
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

#[async_trait]
impl ExternalWallet for LocalWallet {
    fn address(&self) -> Option<Pubkey> {
        Some(self.keypair.pubkey())
    }

    fn can_sign_messages(&self) -> bool {
        true
    }

    async fn sign_message(&self, message: &[u8]) -> Result<TxSignature> {
        Ok(self.keypair.sign(message))
    }

    async fn sign_transaction(&self, transaction: &[u8]) -> Result<Vec<u8>> {
        let mut tx = WireTransaction::from_bytes(transaction)?;
        tx.sign(&self.keypair)?;
        Ok(tx.to_bytes())
    }
}
