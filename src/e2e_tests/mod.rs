//! End-to-end tests against a loopback NTLM server

pub mod loopback;

// Test scenario modules
pub mod scenarios;

pub use loopback::{NtlmTestServer, ServerEvent, TestServerConfig};
