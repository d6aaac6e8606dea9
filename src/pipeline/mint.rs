//! Mint keypair sources.
//!
//! A created token's mint is a fresh keypair that co-signs the create
//! transaction. [`RandomMint`] generates one per call. [`VanityMintPool`]
//! hands out keypairs whose base58 address ends with a fixed suffix
//! (launchpads commonly brand mints this way, e.g. `...pump`), ground on
//! blocking threads ahead of demand.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::blockchain::wallet::Keypair;
use crate::config::MintConfig;
use crate::error::{PipelineError, Result};

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[async_trait]
pub trait MintKeySource: Send + Sync {
    /// Keypair for the next created token's mint.
    async fn next_mint(&self) -> Result<Keypair>;
}

/// A fresh random keypair per mint.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomMint;

#[async_trait]
impl MintKeySource for RandomMint {
    async fn next_mint(&self) -> Result<Keypair> {
        Ok(Keypair::generate())
    }
}

/// Reject suffixes no base58 address can end with.
pub fn check_suffix(suffix: &str) -> Result<()> {
    if suffix.is_empty() {
        return Err(PipelineError::Config("vanity suffix is empty".into()));
    }
    if let Some(c) = suffix.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
        return Err(PipelineError::Config(format!(
            "vanity suffix contains '{c}', which is not a base58 character"
        )));
    }
    Ok(())
}

fn matches_suffix(keypair: &Keypair, suffix: &str) -> bool {
    keypair.pubkey().to_string().ends_with(suffix)
}

/// Generate random keypairs until `count` of them end with `suffix`.
///
/// CPU bound; run it on a blocking thread. Each extra suffix character
/// multiplies the expected work by 58.
pub fn generate_batch(suffix: &str, count: usize) -> Vec<Keypair> {
    std::iter::repeat_with(Keypair::generate)
        .filter(|keypair| matches_suffix(keypair, suffix))
        .take(count)
        .collect()
}

#[derive(Debug, Deserialize)]
struct StoredKeypair {
    #[serde(alias = "publicKey")]
    public_key: String,
    #[serde(alias = "privateKey")]
    private_key: String,
}

/// Pre-generated batch file: `{"suffix": "...", "keypairs": [...]}`.
#[derive(Debug, Deserialize)]
struct StoredBatch {
    suffix: String,
    keypairs: Vec<StoredKeypair>,
}

/// Pool of suffix-matching mint keypairs.
pub struct VanityMintPool {
    suffix: String,
    target: usize,
    pool: Arc<Mutex<Vec<Keypair>>>,
    refilling: Arc<AtomicBool>,
}

impl VanityMintPool {
    /// Empty pool that grinds up to `target` keypairs ending with `suffix`.
    pub fn new(suffix: impl Into<String>, target: usize) -> Result<Self> {
        let suffix = suffix.into();
        check_suffix(&suffix)?;
        Ok(Self {
            suffix,
            target: target.max(1),
            pool: Arc::new(Mutex::new(Vec::new())),
            refilling: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Pool pre-loaded from a batch file.
    ///
    /// Every entry must decode, match its stated public key and end with
    /// `suffix`.
    pub fn from_file(path: impl AsRef<Path>, suffix: &str, target: usize) -> Result<Self> {
        check_suffix(suffix)?;
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read vanity file {}: {e}", path.display()))
        })?;
        let batch: StoredBatch = serde_json::from_str(&content)?;
        if batch.suffix != suffix {
            return Err(PipelineError::Config(format!(
                "vanity file suffix '{}' does not match '{suffix}'",
                batch.suffix
            )));
        }

        let mut keypairs = Vec::with_capacity(batch.keypairs.len());
        for stored in batch.keypairs {
            let keypair = Keypair::from_base58(&stored.private_key)?;
            let address = keypair.pubkey().to_string();
            if address != stored.public_key || !address.ends_with(suffix) {
                return Err(PipelineError::Config(format!(
                    "vanity file entry {} does not match its key or suffix",
                    stored.public_key
                )));
            }
            keypairs.push(keypair);
        }
        tracing::info!(count = keypairs.len(), path = %path.display(), "Loaded vanity mint keypairs");

        Ok(Self {
            suffix: suffix.to_string(),
            target: target.max(1),
            pool: Arc::new(Mutex::new(keypairs)),
            refilling: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub async fn available(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// Grind until the pool holds its target size.
    pub async fn fill(&self) -> Result<()> {
        let needed = self.target.saturating_sub(self.available().await);
        if needed == 0 {
            return Ok(());
        }
        let suffix = self.suffix.clone();
        let batch = tokio::task::spawn_blocking(move || generate_batch(&suffix, needed))
            .await
            .map_err(|e| PipelineError::Config(format!("vanity generation task failed: {e}")))?;
        self.pool.lock().await.extend(batch);
        Ok(())
    }

    /// Refill in the background unless a refill is already running.
    ///
    /// Does nothing outside a tokio runtime.
    pub fn spawn_refill(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.refilling.swap(true, Ordering::SeqCst) {
            return;
        }

        let pool = self.pool.clone();
        let refilling = self.refilling.clone();
        let suffix = self.suffix.clone();
        let target = self.target;
        runtime.spawn(async move {
            let needed = target.saturating_sub(pool.lock().await.len());
            if needed > 0 {
                tracing::info!(needed, suffix = %suffix, "Generating vanity mint keypairs");
                match tokio::task::spawn_blocking(move || generate_batch(&suffix, needed)).await {
                    Ok(batch) => pool.lock().await.extend(batch),
                    Err(e) => tracing::warn!(error = %e, "Vanity generation task failed"),
                }
            }
            refilling.store(false, Ordering::SeqCst);
        });
    }
}

#[async_trait]
impl MintKeySource for VanityMintPool {
    /// Pop a pooled keypair; a random one when the pool has run dry.
    async fn next_mint(&self) -> Result<Keypair> {
        let (next, remaining) = {
            let mut pool = self.pool.lock().await;
            let next = pool.pop();
            (next, pool.len())
        };
        if remaining <= self.target / 2 {
            self.spawn_refill();
        }

        match next {
            Some(keypair) => {
                tracing::info!(mint = %keypair.pubkey(), remaining, "Using vanity mint");
                Ok(keypair)
            }
            None => {
                tracing::warn!(suffix = %self.suffix, "Vanity pool empty, using a random mint");
                Ok(Keypair::generate())
            }
        }
    }
}

impl std::fmt::Debug for VanityMintPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VanityMintPool")
            .field("suffix", &self.suffix)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Mint source selected by `config`: a vanity pool when a suffix is set.
pub fn mint_source_from_config(config: &MintConfig) -> Result<Arc<dyn MintKeySource>> {
    let Some(suffix) = config.vanity_suffix.as_deref() else {
        return Ok(Arc::new(RandomMint));
    };
    let pool = match config.pool_file.as_deref() {
        Some(path) => VanityMintPool::from_file(path, suffix, config.pool_size)?,
        None => VanityMintPool::new(suffix, config.pool_size)?,
    };
    pool.spawn_refill();
    Ok(Arc::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_suffix_must_be_base58() {
        assert!(check_suffix("pump").is_ok());
        assert!(check_suffix("").is_err());
        // '0', 'O', 'I' and 'l' never appear in base58.
        assert!(check_suffix("p0mp").is_err());
        assert!(check_suffix("lol").is_err());
    }

    #[test]
    fn test_generated_batch_matches_suffix() {
        let batch = generate_batch("Z", 3);
        assert_eq!(batch.len(), 3);
        for keypair in &batch {
            assert!(keypair.pubkey().to_string().ends_with('Z'));
        }
    }

    #[tokio::test]
    async fn test_pool_hands_out_suffix_mints() {
        let pool = VanityMintPool::new("x", 4).unwrap();
        pool.fill().await.unwrap();
        assert!(pool.available().await >= 4);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let mint = pool.next_mint().await.unwrap();
            assert!(mint.pubkey().to_string().ends_with('x'));
            assert!(seen.insert(mint.pubkey()));
        }
    }

    #[test]
    fn test_from_file_validates_entries() {
        let (seed, keypair) = (0u32..)
            .map(|i| {
                let mut seed = [7u8; 32];
                seed[..4].copy_from_slice(&i.to_le_bytes());
                (seed, Keypair::from_secret_bytes(seed))
            })
            .find(|(_, keypair)| matches_suffix(keypair, "a"))
            .unwrap();
        let other = Keypair::generate();
        let secret = bs58::encode(seed).into_string();

        let mut good = tempfile::NamedTempFile::new().unwrap();
        write!(
            good,
            r#"{{"suffix":"a","keypairs":[{{"public_key":"{}","private_key":"{}"}}]}}"#,
            keypair.pubkey(),
            secret
        )
        .unwrap();
        let pool = VanityMintPool::from_file(good.path(), "a", 4).unwrap();
        assert_eq!(pool.suffix(), "a");

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(
            bad,
            r#"{{"suffix":"a","keypairs":[{{"publicKey":"{}","privateKey":"{}"}}]}}"#,
            other.pubkey(),
            secret
        )
        .unwrap();
        assert!(VanityMintPool::from_file(bad.path(), "a", 4).is_err());
        assert!(VanityMintPool::from_file(good.path(), "b", 4).is_err());
    }

    #[test]
    fn test_config_without_suffix_is_random() {
        let source = mint_source_from_config(&MintConfig::default());
        assert!(source.is_ok());
    }
}
