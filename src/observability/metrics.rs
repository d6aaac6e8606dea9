//! Metrics collection.
//!
//! # Metrics
//! - `launchpad_rpc_retries_total` (counter): retries by operation
//! - `launchpad_retries_exhausted_total` (counter): exhausted retry loops by operation
//! - `launchpad_prepare_total` (counter): preparations by intent kind and outcome
//! - `launchpad_submissions_total` (counter): submissions by terminal status
//! - `launchpad_duplicate_submissions_total` (counter): submits answered from the ledger
//! - `launchpad_confirmation_seconds` (histogram): time from submit to terminal status
//!
//! The library only records through the `metrics` facade; installing an
//! exporter is left to the host application.

use std::time::Duration;

pub fn record_retry(operation: &'static str) {
    metrics::counter!("launchpad_rpc_retries_total", "operation" => operation).increment(1);
}

pub fn record_retries_exhausted(operation: &'static str) {
    metrics::counter!("launchpad_retries_exhausted_total", "operation" => operation)
        .increment(1);
}

pub fn record_prepare(kind: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!("launchpad_prepare_total", "kind" => kind, "outcome" => outcome)
        .increment(1);
}

pub fn record_submission(status: &'static str) {
    metrics::counter!("launchpad_submissions_total", "status" => status).increment(1);
}

pub fn record_duplicate_submission() {
    metrics::counter!("launchpad_duplicate_submissions_total").increment(1);
}

pub fn record_confirmation(status: &'static str, elapsed: Duration) {
    metrics::histogram!("launchpad_confirmation_seconds", "status" => status)
        .record(elapsed.as_secs_f64());
}
