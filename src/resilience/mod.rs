//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Network call:
//!     → timeouts.rs (enforce per-call deadline)
//!     → On failure: retries.rs (classify, retry with linear backoff)
//!     → After max attempts: RetriesExhausted carrying the last error
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Retries only for reads and for the idempotency-keyed submit
//! - One policy value shared by every call site

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::{classify_error, with_retry, Classification, RetryPolicy};
pub use timeouts::with_deadline;
