//! On-chain program seam.
//!
//! Bonding-curve math and instruction encoding belong to the program. The
//! pipeline only asks for quotes and for unsigned transactions that encode
//! the slippage bound it computed.

pub mod slippage;
pub mod types;

use async_trait::async_trait;

use crate::blockchain::types::{BlockhashContext, Pubkey};
use crate::error::Result;

pub use slippage::{min_output, MAX_SLIPPAGE_BPS};
pub use types::{BondingCurveSnapshot, BuyParams, CreateTokenParams, SellParams};

/// Client for the launchpad program.
///
/// Builders return a serialized transaction with an empty signature slot
/// per required signer. The fee payer (creator, buyer or seller) must be
/// the first signer; a create transaction also requires the mint.
#[async_trait]
pub trait OnChainProgramClient: Send + Sync {
    /// Read the current curve for `mint`.
    async fn fetch_curve(&self, mint: &Pubkey) -> Result<BondingCurveSnapshot>;

    /// The curve a freshly created token starts with.
    fn initial_curve(&self, mint: &Pubkey) -> BondingCurveSnapshot;

    /// Tokens received for `lamports`.
    fn quote_buy(&self, curve: &BondingCurveSnapshot, lamports: u64) -> Result<u64>;

    /// Lamports received for `token_amount`.
    fn quote_sell(&self, curve: &BondingCurveSnapshot, token_amount: u64) -> Result<u64>;

    async fn build_create(&self, params: &CreateTokenParams, blockhash: &BlockhashContext) -> Result<Vec<u8>>;

    async fn build_buy(&self, params: &BuyParams, blockhash: &BlockhashContext) -> Result<Vec<u8>>;

    async fn build_sell(&self, params: &SellParams, blockhash: &BlockhashContext) -> Result<Vec<u8>>;
}
