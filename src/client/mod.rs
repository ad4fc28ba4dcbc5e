//! HTTP client driving registered authentication handlers

use crate::auth::RequestHandler;
use crate::error::{Error, Result};
use crate::protocol::{RequestDescriptor, RequestOptions, Response};
use crate::transport::tcp::TcpTransport;
use crate::transport::HttpTransport;
use bytes::Bytes;
use http::header::USER_AGENT;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sent unless the caller sets its own `User-Agent`
    pub user_agent: String,
    /// Per round-trip timeout
    pub timeout: Option<Duration>,
    /// Hand 401 responses to handlers; when false they are returned as is
    pub allow_authentication_retry: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("rust-ntlm-http/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
            allow_authentication_retry: true,
        }
    }
}

/// HTTP client
pub struct HttpClient {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    handlers: Vec<Arc<dyn RequestHandler>>,
}

impl HttpClient {
    /// Create a client over the plain TCP transport with default configuration
    pub fn new() -> Self {
        Self::with_transport(ClientConfig::default(), Arc::new(TcpTransport::new()))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            transport,
            handlers: Vec::new(),
        }
    }

    /// Register a handler. Handlers are consulted in registration order.
    pub fn add_handler(&mut self, handler: Arc<dyn RequestHandler>) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build the descriptor for a request, letting every handler adjust the
    /// options first.
    pub fn prepare(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
    ) -> Result<RequestDescriptor> {
        let mut options = RequestOptions {
            method,
            headers,
            timeout: self.config.timeout,
            agent: None,
        };
        if !options.headers.contains_key(USER_AGENT) {
            options
                .headers
                .insert(USER_AGENT, HeaderValue::from_str(&self.config.user_agent)?);
        }
        for handler in &self.handlers {
            handler.prepare_request(&mut options);
        }

        RequestDescriptor::new(Url::parse(url)?, options)
    }

    /// Send a request, answering an authentication demand with the first
    /// handler that recognises it.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        payload: Option<Bytes>,
    ) -> Result<Response> {
        let request = self.prepare(method, url, headers)?;
        self.send(&request, payload).await
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(Method::GET, url, HeaderMap::new(), None).await
    }

    /// Send a prepared request through the handler loop.
    pub async fn send(
        &self,
        request: &RequestDescriptor,
        payload: Option<Bytes>,
    ) -> Result<Response> {
        debug!("{} {}", request.options.method, request.url);
        let response = self.transport.send_raw(request, payload.clone()).await?;

        if response.status != StatusCode::UNAUTHORIZED || !self.config.allow_authentication_retry {
            return Ok(response);
        }

        match self.find_handler(&response) {
            Some(handler) => {
                info!("Authenticating request to {}", request.url);
                handler
                    .handle_authentication(self.transport.as_ref(), request, payload)
                    .await
            }
            None => {
                debug!("No handler accepts the 401 from {}", request.url);
                Ok(response)
            }
        }
    }

    /// Authenticate `request` against an already received `response`.
    /// Fails with [`Error::PreconditionViolation`] when no registered handler
    /// recognises the response.
    pub async fn authenticate(
        &self,
        request: &RequestDescriptor,
        payload: Option<Bytes>,
        response: &Response,
    ) -> Result<Response> {
        let handler = self.find_handler(response).ok_or_else(|| {
            Error::PreconditionViolation(format!(
                "no handler accepts a {} response from {}",
                response.status, request.url
            ))
        })?;
        handler
            .handle_authentication(self.transport.as_ref(), request, payload)
            .await
    }

    fn find_handler(&self, response: &Response) -> Option<&Arc<dyn RequestHandler>> {
        self.handlers
            .iter()
            .find(|handler| handler.can_handle_authentication(response))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
