//! Shared tenant primitives for the Presence workspace.
//!
//! This crate holds the types every other crate agrees on:
//!
//! - [`TenantContext`] - resolved identity + connection coordinates for one
//!   tenant, produced per request by the registry client
//! - [`RuntimeEnv`] - dev/prod switch that gates dev-only behavior
//! - [`ContactCipher`] - encryption and hashing for stored contact numbers
//! - request-hash helpers shared by the HTTP handlers and the worker

mod context;
mod crypto;
mod hashing;

pub use context::{RuntimeEnv, TenantContext};
pub use crypto::{normalize_phone, ContactCipher, CryptoError};
pub use hashing::{frame_request_hash, message_request_hash, sha256_hex};
