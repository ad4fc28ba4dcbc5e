//! Authentication handlers for HTTP

pub mod codec;
pub mod credentials;
pub mod handler;
pub mod ntlm;
pub mod ntlm_crypto;

pub use codec::{NtlmCodec, NtlmV2Codec};
pub use credentials::Credentials;
pub use handler::NtlmCredentialHandler;

use crate::error::Result;
use crate::protocol::{RequestDescriptor, RequestOptions, Response};
use crate::transport::HttpTransport;
use async_trait::async_trait;
use bytes::Bytes;

/// A pluggable handler that can answer a server's authentication demand.
///
/// Callers run [`can_handle_authentication`](Self::can_handle_authentication)
/// on every response and only call
/// [`handle_authentication`](Self::handle_authentication) when it returned
/// true; implementations do not re-validate that.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Adjust options before the first attempt of a request.
    fn prepare_request(&self, options: &mut RequestOptions);

    /// Whether this handler recognises the authentication demand in `response`.
    fn can_handle_authentication(&self, response: &Response) -> bool;

    /// Run the authentication exchange and return the final response.
    async fn handle_authentication(
        &self,
        client: &dyn HttpTransport,
        request: &RequestDescriptor,
        payload: Option<Bytes>,
    ) -> Result<Response>;
}
