//! Values exchanged with the on-chain program client.

use std::time::{Duration, Instant};

use crate::blockchain::types::Pubkey;

/// Bonding-curve state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondingCurveSnapshot {
    pub mint: Pubkey,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub real_token_reserves: u64,
    /// The curve has migrated and no longer trades.
    pub complete: bool,
    /// When this state was read from the network.
    pub observed_at: Instant,
}

impl BondingCurveSnapshot {
    pub fn age(&self) -> Duration {
        self.observed_at.elapsed()
    }
}

/// Inputs for a create (and optional first buy) transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTokenParams {
    pub creator: Pubkey,
    pub mint: Pubkey,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    /// `(lamports, min_tokens_out)` for a buy bundled with the create.
    pub initial_buy: Option<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyParams {
    pub buyer: Pubkey,
    pub mint: Pubkey,
    pub lamports: u64,
    pub min_tokens_out: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellParams {
    pub seller: Pubkey,
    pub mint: Pubkey,
    pub token_amount: u64,
    pub min_sol_out: u64,
}
