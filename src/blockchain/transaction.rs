//! Transaction wire format.
//!
//! A serialized transaction is a compact-u16 count of signatures, the
//! 64-byte signatures themselves, then the message. The message header
//! tells how many of the leading account keys must sign; signature slot `i`
//! belongs to account key `i`. Signatures are independent ed25519
//! signatures over the message bytes, so slots can be filled in any order
//! as long as the message itself is never altered.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::blockchain::types::{Pubkey, TxSignature, PUBKEY_LEN, SIGNATURE_LEN};
use crate::blockchain::wallet::Keypair;
use crate::error::{PipelineError, Result};

const VERSION_PREFIX_MASK: u8 = 0x80;

/// Decode a compact-u16 ("shortvec") length. Returns the value and bytes consumed.
pub fn decode_compact_u16(bytes: &[u8]) -> Result<(u16, usize)> {
    let mut value: u32 = 0;
    for i in 0..3 {
        let byte = *bytes
            .get(i)
            .ok_or_else(|| PipelineError::InvalidTransaction("truncated length prefix".into()))?;
        value |= u32::from(byte & 0x7f) << (i * 7);
        if byte & 0x80 == 0 {
            return u16::try_from(value)
                .map(|v| (v, i + 1))
                .map_err(|_| PipelineError::InvalidTransaction("length prefix overflow".into()));
        }
    }
    Err(PipelineError::InvalidTransaction("length prefix too long".into()))
}

/// Append a compact-u16 encoding of `value` to `out`.
pub fn encode_compact_u16(mut value: u16, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

/// Parsed view of the parts of a message the pipeline cares about.
#[derive(Debug, Clone)]
struct MessageLayout {
    num_required_signatures: usize,
    account_keys: Vec<Pubkey>,
    recent_blockhash: [u8; 32],
}

fn parse_message(message: &[u8]) -> Result<MessageLayout> {
    let mut offset = 0;
    let first = *message
        .first()
        .ok_or_else(|| PipelineError::InvalidTransaction("empty message".into()))?;
    if first & VERSION_PREFIX_MASK != 0 {
        let version = first & !VERSION_PREFIX_MASK;
        if version != 0 {
            return Err(PipelineError::InvalidTransaction(format!(
                "unsupported message version {version}"
            )));
        }
        offset += 1;
    }

    let header = message
        .get(offset..offset + 3)
        .ok_or_else(|| PipelineError::InvalidTransaction("truncated message header".into()))?;
    let num_required_signatures = header[0] as usize;
    offset += 3;

    let (num_keys, consumed) = decode_compact_u16(&message[offset..])?;
    offset += consumed;

    let mut account_keys = Vec::with_capacity(num_keys as usize);
    for _ in 0..num_keys {
        let key: [u8; PUBKEY_LEN] = message
            .get(offset..offset + PUBKEY_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| PipelineError::InvalidTransaction("truncated account keys".into()))?;
        account_keys.push(Pubkey::new(key));
        offset += PUBKEY_LEN;
    }

    if num_required_signatures == 0 || num_required_signatures > account_keys.len() {
        return Err(PipelineError::InvalidTransaction(format!(
            "message requires {num_required_signatures} signatures but lists {} accounts",
            account_keys.len()
        )));
    }

    let recent_blockhash: [u8; 32] = message
        .get(offset..offset + 32)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| PipelineError::InvalidTransaction("truncated blockhash".into()))?;

    Ok(MessageLayout {
        num_required_signatures,
        account_keys,
        recent_blockhash,
    })
}

/// A transaction split into its signature slots and message bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireTransaction {
    signatures: Vec<TxSignature>,
    message: Vec<u8>,
}

impl WireTransaction {
    /// Wrap a message with one empty signature slot per required signer.
    pub fn unsigned(message: Vec<u8>) -> Result<Self> {
        let layout = parse_message(&message)?;
        Ok(Self {
            signatures: vec![TxSignature::EMPTY; layout.num_required_signatures],
            message,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (count, mut offset) = decode_compact_u16(bytes)?;
        let mut signatures = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let sig: [u8; SIGNATURE_LEN] = bytes
                .get(offset..offset + SIGNATURE_LEN)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| PipelineError::InvalidTransaction("truncated signatures".into()))?;
            signatures.push(TxSignature(sig));
            offset += SIGNATURE_LEN;
        }

        let message = bytes[offset..].to_vec();
        let layout = parse_message(&message)?;
        if layout.num_required_signatures != signatures.len() {
            return Err(PipelineError::InvalidTransaction(format!(
                "{} signature slots for {} required signers",
                signatures.len(),
                layout.num_required_signatures
            )));
        }

        Ok(Self { signatures, message })
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.signatures.len() * SIGNATURE_LEN + self.message.len());
        encode_compact_u16(self.signatures.len() as u16, &mut out);
        for sig in &self.signatures {
            out.extend_from_slice(sig.as_bytes());
        }
        out.extend_from_slice(&self.message);
        out
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// The bytes every signer signs.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Accounts whose signatures are required, in slot order. The first is the fee payer.
    pub fn required_signers(&self) -> Result<Vec<Pubkey>> {
        let layout = parse_message(&self.message)?;
        Ok(layout.account_keys[..layout.num_required_signatures].to_vec())
    }

    /// Base58 recent blockhash embedded in the message.
    pub fn recent_blockhash(&self) -> Result<String> {
        let layout = parse_message(&self.message)?;
        Ok(bs58::encode(layout.recent_blockhash).into_string())
    }

    fn slot_of(&self, signer: &Pubkey) -> Result<usize> {
        self.required_signers()?
            .iter()
            .position(|k| k == signer)
            .ok_or_else(|| {
                PipelineError::Signing(format!("{signer} is not a required signer of this transaction"))
            })
    }

    /// Sign the message with `keypair` and place the signature in its slot.
    pub fn sign(&mut self, keypair: &Keypair) -> Result<TxSignature> {
        let slot = self.slot_of(&keypair.pubkey())?;
        let signature = keypair.sign(&self.message);
        self.signatures[slot] = signature;
        Ok(signature)
    }

    /// Signature currently held in `signer`'s slot, if filled.
    pub fn signature_of(&self, signer: &Pubkey) -> Option<TxSignature> {
        let slot = self.slot_of(signer).ok()?;
        let sig = self.signatures[slot];
        (!sig.is_empty()).then_some(sig)
    }

    /// The fee payer's signature, which identifies the transaction on the network.
    pub fn primary_signature(&self) -> Option<TxSignature> {
        self.signatures.first().copied().filter(|s| !s.is_empty())
    }

    /// Required signers whose slot is still empty.
    pub fn missing_signers(&self) -> Result<Vec<Pubkey>> {
        Ok(self
            .required_signers()?
            .into_iter()
            .zip(&self.signatures)
            .filter(|(_, sig)| sig.is_empty())
            .map(|(key, _)| key)
            .collect())
    }

    /// Check every filled slot is a valid signature of its signer over the message.
    pub fn verify_signatures(&self) -> Result<()> {
        for (key, sig) in self.required_signers()?.iter().zip(&self.signatures) {
            if sig.is_empty() {
                continue;
            }
            let verifying = VerifyingKey::from_bytes(key.as_bytes())
                .map_err(|e| PipelineError::Signing(format!("invalid signer key {key}: {e}")))?;
            verifying
                .verify(&self.message, &Signature::from_bytes(sig.as_bytes()))
                .map_err(|_| PipelineError::Signing(format!("signature for {key} does not verify")))?;
        }
        Ok(())
    }

    /// All slots filled and valid.
    pub fn verify_complete(&self) -> Result<()> {
        let missing = self.missing_signers()?;
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|k| k.to_string()).collect();
            return Err(PipelineError::Signing(format!(
                "missing signatures from {}",
                names.join(", ")
            )));
        }
        self.verify_signatures()
    }
}

/// An instruction with accounts given as indices into the message's key list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

/// Compile a legacy message.
///
/// `signers` become the leading writable signer accounts (the first pays
/// fees); `readonly_accounts` are appended as read-only non-signers (program
/// ids go here).
pub fn compile_legacy_message(
    signers: &[Pubkey],
    writable_accounts: &[Pubkey],
    readonly_accounts: &[Pubkey],
    recent_blockhash: &[u8; 32],
    instructions: &[CompiledInstruction],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(signers.len() as u8);
    out.push(0);
    out.push(readonly_accounts.len() as u8);

    let total = signers.len() + writable_accounts.len() + readonly_accounts.len();
    encode_compact_u16(total as u16, &mut out);
    for key in signers.iter().chain(writable_accounts).chain(readonly_accounts) {
        out.extend_from_slice(key.as_bytes());
    }
    out.extend_from_slice(recent_blockhash);

    encode_compact_u16(instructions.len() as u16, &mut out);
    for ix in instructions {
        out.push(ix.program_id_index);
        encode_compact_u16(ix.accounts.len() as u16, &mut out);
        out.extend_from_slice(&ix.accounts);
        encode_compact_u16(ix.data.len() as u16, &mut out);
        out.extend_from_slice(&ix.data);
    }
    out
}
