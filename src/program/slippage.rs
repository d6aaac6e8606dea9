//! Slippage bounds.
//!
//! Buys encode a minimum token output, sells a minimum SOL output. Both are
//! `expected * (10_000 - bps) / 10_000`, rounded down.

use crate::error::{PipelineError, Result};

/// Basis points in 100%.
pub const MAX_SLIPPAGE_BPS: u16 = 10_000;

/// Minimum acceptable output for `expected` at `slippage_bps` tolerance.
///
/// The bound is never above `expected` and never zero; a tolerance that
/// would encode an unbounded trade is rejected.
pub fn min_output(expected: u64, slippage_bps: u16) -> Result<u64> {
    if slippage_bps > MAX_SLIPPAGE_BPS {
        return Err(PipelineError::InsufficientInput(format!(
            "slippage {slippage_bps} bps exceeds {MAX_SLIPPAGE_BPS}"
        )));
    }
    if expected == 0 {
        return Err(PipelineError::InsufficientInput("expected output is zero".into()));
    }

    let keep = u128::from(MAX_SLIPPAGE_BPS - slippage_bps);
    let bound = u128::from(expected) * keep / u128::from(MAX_SLIPPAGE_BPS);
    // bound <= expected, so it fits back into u64.
    let bound = bound as u64;
    if bound == 0 {
        return Err(PipelineError::InsufficientInput(format!(
            "slippage bound is zero for expected output {expected} at {slippage_bps} bps"
        )));
    }
    Ok(bound)
}
