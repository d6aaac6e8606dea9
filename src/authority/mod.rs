//! Launchpad authority.
//!
//! `client.rs` talks to a remote authority over HTTP. `server.rs` is a
//! reference implementation of the same surface, used for local
//! development and integration tests, backed by `ledger.rs`.

pub mod client;
pub mod ledger;
pub mod server;

pub use client::AuthorityClient;
pub use ledger::{PendingEntry, PendingLedger, Retention};
pub use server::AuthorityServer;
