//! HTTP request and response types shared by handlers, transports and the client
//!
//! Header maps come from the `http` crate, so lookups such as
//! `www-authenticate` are case-insensitive.

use crate::error::{Error, Result};
use crate::transport::ConnectionAgent;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// Which connection type a request needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `http`
    Plain,
    /// `https`
    Secure,
}

impl Scheme {
    pub fn from_url(url: &Url) -> Result<Self> {
        match url.scheme() {
            "http" => Ok(Scheme::Plain),
            "https" => Ok(Scheme::Secure),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn is_secure(self) -> bool {
        self == Scheme::Secure
    }
}

/// Per-request options
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    /// Applies to each round trip separately
    pub timeout: Option<Duration>,
    /// Connection to send the request over; `None` opens a fresh one
    pub agent: Option<ConnectionAgent>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            timeout: None,
            agent: None,
        }
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Everything except headers and the agent.
    pub fn without_headers_and_agent(&self) -> Self {
        Self {
            method: self.method.clone(),
            headers: HeaderMap::new(),
            timeout: self.timeout,
            agent: None,
        }
    }

    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }
}

/// A request as handed to a transport: binding, target and options.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub scheme: Scheme,
    pub url: Url,
    pub options: RequestOptions,
}

impl RequestDescriptor {
    pub fn new(url: Url, options: RequestOptions) -> Result<Self> {
        Ok(Self {
            scheme: Scheme::from_url(&url)?,
            url,
            options,
        })
    }

    pub fn parse(method: Method, url: &str) -> Result<Self> {
        Self::new(Url::parse(url)?, RequestOptions::new(method))
    }

    /// Same binding and target with different options.
    pub fn with_options(&self, options: RequestOptions) -> Self {
        Self {
            scheme: self.scheme,
            url: self.url.clone(),
            options,
        }
    }
}

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        self.headers.append(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// All values of a header joined with `", "`, or `None` when absent.
    /// Values that are not visible ASCII are skipped.
    pub fn header_str(&self, name: &HeaderName) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();

        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Whether the server asked for the connection to be closed.
    pub fn wants_close(&self) -> bool {
        connection_close(&self.headers)
    }
}

/// `Connection: close` present in a header map (case-insensitive token match)
pub fn connection_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}
