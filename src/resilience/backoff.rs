//! Linear backoff.
//!
//! RPC rate-limit windows reset on short fixed intervals, so the delay grows
//! linearly with the number of failures instead of doubling.

use std::time::Duration;

/// Delay to wait after the `failures`-th consecutive failed attempt.
pub fn linear_backoff(failures: u32, base: Duration) -> Duration {
    base.saturating_mul(failures)
}
