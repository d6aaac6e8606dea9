//! Session credential acquisition.
//!
//! The credential is acquired under a `tokio::sync::Mutex` so concurrent
//! callers wait for the one signing prompt in progress instead of each
//! prompting the user.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::time::SystemTime;
use tokio::sync::Mutex;

use crate::auth::message::build_auth_message;
use crate::blockchain::types::Pubkey;
use crate::blockchain::wallet::ExternalWallet;
use crate::error::{PipelineError, Result};

/// Proof that the session's wallet signed the auth message.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCredential {
    pub wallet_address: Pubkey,
    /// Base64 ed25519 signature over the auth message.
    pub signature: String,
    pub issued_at: SystemTime,
}

impl std::fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredential")
            .field("wallet_address", &self.wallet_address)
            .field("signature", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Caches one credential per connected wallet session.
#[derive(Debug, Default)]
pub struct Authenticator {
    cached: Mutex<Option<AuthCredential>>,
}

impl Authenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session credential, prompting the wallet at most once.
    ///
    /// A disconnected wallet clears the cache. A different address than the
    /// cached one replaces the credential.
    pub async fn ensure_credential(&self, wallet: &dyn ExternalWallet) -> Result<AuthCredential> {
        let mut cached = self.cached.lock().await;

        let Some(address) = wallet.address() else {
            if cached.take().is_some() {
                tracing::info!("Wallet disconnected, credential invalidated");
            }
            return Err(PipelineError::AuthUnavailable("wallet not connected".into()));
        };

        if let Some(credential) = cached.as_ref() {
            if credential.wallet_address == address {
                return Ok(credential.clone());
            }
            tracing::info!(
                previous = %credential.wallet_address,
                current = %address,
                "Wallet address changed, credential invalidated"
            );
        }
        *cached = None;

        if !wallet.can_sign_messages() {
            return Err(PipelineError::AuthUnavailable(
                "wallet does not support message signing".into(),
            ));
        }

        let message = build_auth_message(&address);
        let signature = wallet.sign_message(message.as_bytes()).await.map_err(|e| {
            tracing::warn!(wallet = %address, error = %e, "Auth message signing failed");
            PipelineError::AuthUnavailable(format!("message signing failed: {e}"))
        })?;

        let credential = AuthCredential {
            wallet_address: address,
            signature: BASE64.encode(signature.as_bytes()),
            issued_at: SystemTime::now(),
        };
        tracing::info!(wallet = %address, "Session credential acquired");
        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Drop the cached credential (logout).
    pub async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            tracing::info!("Session credential invalidated");
        }
    }

    /// The cached credential, if any, without prompting.
    pub async fn current(&self) -> Option<AuthCredential> {
        self.cached.lock().await.clone()
    }
}
