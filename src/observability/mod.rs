//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, histograms via the metrics facade)
//! ```
//!
//! # Design Decisions
//! - Structured fields (pending_id, signature, attempt) on every event
//! - Keypairs and auth signatures are never logged

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
