//! NTLM Authentication for HTTP in Rust
//!
//! A request handler that answers `401 WWW-Authenticate: NTLM` with the
//! negotiate/challenge/authenticate handshake over one dedicated connection,
//! plus a small HTTP/1.1 client and transport to drive it.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod error;
pub mod protocol;
pub mod transport;

#[cfg(feature = "client")]
pub mod client;

#[cfg(test)]
pub mod e2e_tests;

pub use error::{Error, Result};
