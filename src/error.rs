//! Error types for the NTLM HTTP authentication handler

use std::io;
use thiserror::Error;

/// Result type for handler, codec and transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The negotiate response carried no `www-authenticate` header
    #[error("www-authenticate not found on response of negotiate request")]
    ChallengeMissing,

    /// A handler was asked to authenticate a response it cannot handle
    #[error("Authentication precondition violated: {0}")]
    PreconditionViolation(String),

    /// NTLM message parsing error
    #[error("NTLM parsing error: {0}")]
    ParseError(String),

    /// The `www-authenticate` header did not contain a usable NTLM challenge
    #[error("Invalid NTLM challenge: {0}")]
    InvalidChallenge(String),

    /// Hashing or MAC failure
    #[error("NTLM crypto error: {0}")]
    CryptoError(String),

    /// Malformed HTTP response from the server
    #[error("Invalid HTTP response: {0}")]
    InvalidResponse(String),

    /// The transport cannot serve this URL scheme
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Invalid request target
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid header name or value
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Base64 decoding failed
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Connection closed by peer
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timeout occurred
    #[error("Operation timed out")]
    Timeout,
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Error::InvalidHeader(e.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(e: http::header::InvalidHeaderName) -> Self {
        Error::InvalidHeader(e.to_string())
    }
}

impl From<http::method::InvalidMethod> for Error {
    fn from(e: http::method::InvalidMethod) -> Self {
        Error::InvalidHeader(format!("method: {}", e))
    }
}

impl Error {
    /// Whether the error came from the network layer rather than from NTLM
    /// processing or caller misuse.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::InvalidResponse(_)
                | Error::UnsupportedScheme(_)
                | Error::ConnectionClosed
                | Error::Timeout
        )
    }
}
