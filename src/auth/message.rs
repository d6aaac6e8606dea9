//! Authentication challenge.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::blockchain::types::Pubkey;
use crate::error::{PipelineError, Result};

/// Header carrying the base64 wallet signature on authority requests.
pub const AUTH_HEADER: &str = "x-request-signature";

/// The message a wallet signs to prove it owns `address`.
pub fn build_auth_message(address: &Pubkey) -> String {
    format!(
        "Sign this message to authenticate with the launchpad API.\n\n\
         Wallet: {address}\n\n\
         This signature proves you own this wallet and allows you to interact with the API."
    )
}

/// Check that `signature_b64` is `address`'s signature over its auth message.
pub fn verify_auth_signature(address: &Pubkey, signature_b64: &str) -> Result<()> {
    let bytes = BASE64.decode(signature_b64.trim())?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|v: Vec<u8>| {
        PipelineError::Signing(format!("auth signature has {} bytes, expected 64", v.len()))
    })?;

    let key = VerifyingKey::from_bytes(address.as_bytes())
        .map_err(|e| PipelineError::Signing(format!("invalid wallet address {address}: {e}")))?;
    key.verify(build_auth_message(address).as_bytes(), &Signature::from_bytes(&bytes))
        .map_err(|_| PipelineError::Signing(format!("auth signature does not match {address}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::wallet::Keypair;

    #[test]
    fn test_message_names_wallet() {
        let address = Pubkey::new([4u8; 32]);
        let message = build_auth_message(&address);
        assert!(message.starts_with("Sign this message to authenticate"));
        assert!(message.contains(&format!("\n\nWallet: {address}\n\n")));
    }

    #[test]
    fn test_verify_round_trip() {
        let keypair = Keypair::generate();
        let address = keypair.pubkey();
        let signature = keypair.sign(build_auth_message(&address).as_bytes());
        let encoded = BASE64.encode(signature.as_bytes());
        verify_auth_signature(&address, &encoded).unwrap();
    }

    #[test]
    fn test_verify_rejects_other_wallet() {
        let signer = Keypair::generate();
        let claimed = Keypair::generate().pubkey();
        let signature = signer.sign(build_auth_message(&claimed).as_bytes());
        let encoded = BASE64.encode(signature.as_bytes());
        assert!(verify_auth_signature(&claimed, &encoded).is_err());
        assert!(verify_auth_signature(&claimed, "bm90IGEgc2lnbmF0dXJl").is_err());
    }
}
