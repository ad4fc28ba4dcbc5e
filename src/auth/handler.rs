//! NTLM handshake over HTTP
//!
//! After a request comes back `401` with `www-authenticate: NTLM`, the
//! handler replays it twice on one dedicated keep-alive connection: first
//! with the negotiate token, then, after reading the server's challenge,
//! with the authenticate token. The second response is the caller's result.

use super::codec::{NtlmCodec, NtlmV2Codec, NTLM_SCHEME};
use super::credentials::Credentials;
use super::RequestHandler;
use crate::error::{Error, Result};
use crate::protocol::{RequestDescriptor, RequestOptions, Response};
use crate::transport::{AgentKind, ConnectionAgent, HttpTransport};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONNECTION, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use tracing::{debug, trace, warn};

/// True iff `response` is a 401 whose `www-authenticate` header announces
/// bare NTLM. A header that already carries a token (`NTLM TlRM...`) does not
/// count: only an element exactly equal to `NTLM` after splitting on `", "`.
pub fn is_ntlm_challenge(response: &Response) -> bool {
    if response.status != StatusCode::UNAUTHORIZED {
        return false;
    }

    response
        .header_str(&WWW_AUTHENTICATE)
        .map(|value| value.split(", ").any(|mechanism| mechanism == NTLM_SCHEME))
        .unwrap_or(false)
}

/// Resources owned by one in-flight handshake.
#[derive(Debug)]
pub struct HandshakeSession {
    agent: ConnectionAgent,
    /// Response to the negotiate step, held until the session closes
    intermediate: Option<Response>,
}

impl HandshakeSession {
    pub fn open(secure: bool) -> Self {
        let kind = if secure {
            AgentKind::Secure
        } else {
            AgentKind::Plain
        };
        Self {
            agent: ConnectionAgent::new(kind),
            intermediate: None,
        }
    }

    pub fn agent(&self) -> &ConnectionAgent {
        &self.agent
    }

    /// The challenge response received on the negotiate step, if any.
    pub fn intermediate(&self) -> Option<&Response> {
        self.intermediate.as_ref()
    }

    /// Close the handshake's connection.
    pub async fn close(self) {
        self.agent.release().await;
    }
}

/// Options for the negotiate step: only the handler's headers, caller's
/// other options, bound to the handshake agent.
fn negotiate_options(
    original: &RequestOptions,
    token: &str,
    agent: &ConnectionAgent,
) -> Result<RequestOptions> {
    let mut options = original.without_headers_and_agent();
    options
        .headers
        .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    options
        .headers
        .insert(AUTHORIZATION, HeaderValue::from_str(token)?);
    options.agent = Some(agent.clone());
    Ok(options)
}

/// Options for the authenticate step: caller's headers with the handler's
/// `Authorization` and `Connection` taking precedence.
fn authenticate_options(
    original: &RequestOptions,
    token: &str,
    agent: &ConnectionAgent,
) -> Result<RequestOptions> {
    let mut options = original.without_headers_and_agent();
    options.headers = original.headers.clone();
    options
        .headers
        .insert(AUTHORIZATION, HeaderValue::from_str(token)?);
    options
        .headers
        .insert(CONNECTION, HeaderValue::from_static("close"));
    options.agent = Some(agent.clone());
    Ok(options)
}

/// Request handler answering NTLM challenges with fixed credentials.
#[derive(Debug, Clone)]
pub struct NtlmCredentialHandler<C = NtlmV2Codec> {
    credentials: Credentials,
    codec: C,
}

impl NtlmCredentialHandler<NtlmV2Codec> {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_codec(credentials, NtlmV2Codec::new())
    }
}

impl<C: NtlmCodec> NtlmCredentialHandler<C> {
    pub fn with_codec(credentials: Credentials, codec: C) -> Self {
        Self { credentials, codec }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Send the negotiate (type 1) message. The caller's headers are not
    /// forwarded on this step.
    pub async fn send_type1(
        &self,
        client: &dyn HttpTransport,
        request: &RequestDescriptor,
        payload: Option<Bytes>,
        agent: &ConnectionAgent,
    ) -> Result<Response> {
        let token = self.codec.create_negotiate_message(&self.credentials)?;
        trace!("Negotiate token is {} bytes", token.len());

        let options = negotiate_options(&request.options, &token, agent)?;
        debug!("Sending NTLM negotiate to {}", request.url);
        client.send_raw(&request.with_options(options), payload).await
    }

    /// Answer the challenge in `type1_response` with the authenticate
    /// (type 3) message on the same agent.
    pub async fn send_type3(
        &self,
        client: &dyn HttpTransport,
        request: &RequestDescriptor,
        payload: Option<Bytes>,
        agent: &ConnectionAgent,
        type1_response: &Response,
    ) -> Result<Response> {
        let header = type1_response
            .header_str(&WWW_AUTHENTICATE)
            .ok_or(Error::ChallengeMissing)?;

        let challenge = self.codec.parse_challenge_message(&header)?;
        debug!(
            "Received NTLM challenge from target {:?} (flags {:#010x})",
            challenge.target_name,
            challenge.flags.bits()
        );

        let token = self
            .codec
            .create_authenticate_message(&challenge, &self.credentials)?;
        trace!("Authenticate token is {} bytes", token.len());

        let options = authenticate_options(&request.options, &token, agent)?;
        debug!(
            "Sending NTLM authenticate for {} to {}",
            self.credentials.username(),
            request.url
        );
        client.send_raw(&request.with_options(options), payload).await
    }

    async fn run_handshake(
        &self,
        client: &dyn HttpTransport,
        request: &RequestDescriptor,
        payload: Option<Bytes>,
        session: &mut HandshakeSession,
    ) -> Result<Response> {
        let type1_response = self
            .send_type1(client, request, payload.clone(), &session.agent)
            .await?;
        debug!("Negotiate answered with {}", type1_response.status);
        let type1_response = session.intermediate.insert(type1_response);

        // The authenticate request must not be issued in the same
        // continuation that received the negotiate response: servers such
        // as IIS then reject the exchange. Give the scheduler one tick.
        tokio::task::yield_now().await;

        self.send_type3(client, request, payload, &session.agent, type1_response)
            .await
    }
}

#[async_trait]
impl<C: NtlmCodec> RequestHandler for NtlmCredentialHandler<C> {
    /// NTLM binds identity to one connection, so pooling or proxy agents
    /// supplied by the caller are never used.
    fn prepare_request(&self, options: &mut RequestOptions) {
        if let Some(agent) = options.agent.take() {
            debug!("Dropping caller agent {} for NTLM request", agent.id());
        }
    }

    fn can_handle_authentication(&self, response: &Response) -> bool {
        is_ntlm_challenge(response)
    }

    async fn handle_authentication(
        &self,
        client: &dyn HttpTransport,
        request: &RequestDescriptor,
        payload: Option<Bytes>,
    ) -> Result<Response> {
        let mut session = HandshakeSession::open(client.is_secure(request));
        debug!(
            "Starting NTLM handshake with {} on agent {}",
            request.url,
            session.agent.id()
        );

        let result = self
            .run_handshake(client, request, payload, &mut session)
            .await;
        session.close().await;

        match &result {
            Ok(response) => debug!("NTLM handshake finished with {}", response.status),
            Err(e) => warn!("NTLM handshake with {} failed: {}", request.url, e),
        }
        result
    }
}
