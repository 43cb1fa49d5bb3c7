//! Marketplace platform integration.
//!
//! Two layers: [`signer`] builds HMAC-signed requests and executes each one
//! exactly once; [`client`] composes the signer with the credential service
//! to add the refresh-once-retry-once policy.

pub mod client;
pub mod signer;

pub use client::ApiClient;
pub use signer::{CallOutcome, SignedRequestExecutor};
