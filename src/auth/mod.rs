//! Wallet-signed request authentication.
//!
//! # Data Flow
//! ```text
//! ExternalWallet (connected address)
//!     → message.rs (fixed challenge text)
//!     → authenticator.rs (single prompt per session, cached credential)
//!     → AuthCredential (x-request-signature header on authority calls)
//! ```

pub mod authenticator;
pub mod message;

pub use authenticator::{AuthCredential, Authenticator};
pub use message::{build_auth_message, verify_auth_signature, AUTH_HEADER};
