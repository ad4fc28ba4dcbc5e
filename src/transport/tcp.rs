//! Plain HTTP/1.1 transport over tokio TCP streams

use super::{Connection, HttpTransport};
use crate::error::{Error, Result};
use crate::protocol::{connection_close, RequestDescriptor, Response};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

/// Upper bound on the size of a response head
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on the size of a response body
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// HTTP/1.1 transport for `http://` targets
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    connect_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    async fn connect(&self, url: &Url) -> Result<Connection> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidResponse(format!("URL has no host: {}", url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::UnsupportedScheme(url.scheme().to_string()))?;
        // Bracketed IPv6 literals are not valid socket host strings
        let host = host.trim_start_matches('[').trim_end_matches(']');

        let connect = TcpStream::connect((host, port));
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| Error::Timeout)??,
            None => connect.await?,
        };
        stream.set_nodelay(true)?;
        debug!("Connected to {}:{}", host, port);

        Ok(BufStream::new(stream))
    }
}

#[async_trait]
impl HttpTransport for TcpTransport {
    async fn send_raw(
        &self,
        request: &RequestDescriptor,
        payload: Option<Bytes>,
    ) -> Result<Response> {
        if request.scheme.is_secure() {
            return Err(Error::UnsupportedScheme(format!(
                "{} (TLS is not available in the TCP transport)",
                request.url.scheme()
            )));
        }

        let agent = request.options.agent.as_ref();
        let parked = match agent {
            Some(agent) => agent.take_connection().await,
            None => None,
        };
        let mut connection = match parked {
            Some(connection) => {
                debug!("Reusing parked connection for {}", request.url);
                connection
            }
            None => self.connect(&request.url).await?,
        };

        let exchange = round_trip(&mut connection, request, payload);
        let (response, delimited) = match request.options.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| Error::Timeout)??,
            None => exchange.await?,
        };

        let reusable =
            delimited && !response.wants_close() && !connection_close(&request.options.headers);
        if let Some(agent) = agent {
            if reusable {
                agent.park_connection(connection).await;
            } else {
                debug!("Closing connection of agent {}", agent.id());
            }
        }

        Ok(response)
    }
}

fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Serialize the request head and body
pub(crate) fn encode_request(request: &RequestDescriptor, payload: Option<&[u8]>) -> Vec<u8> {
    let options = &request.options;
    let mut head = format!(
        "{} {} HTTP/1.1\r\n",
        options.method,
        request_target(&request.url)
    );

    if !options.headers.contains_key(HOST) {
        head.push_str(&format!("host: {}\r\n", host_header(&request.url)));
    }

    for (name, value) in options.headers.iter() {
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(&String::from_utf8_lossy(value.as_bytes()));
        head.push_str("\r\n");
    }

    if let Some(body) = payload {
        if !options.headers.contains_key(CONTENT_LENGTH) {
            head.push_str(&format!("content-length: {}\r\n", body.len()));
        }
    }
    head.push_str("\r\n");

    let mut bytes = head.into_bytes();
    if let Some(body) = payload {
        bytes.extend_from_slice(body);
    }
    bytes
}

/// Write one request and read its response. The flag tells whether the
/// body was delimited, i.e. the connection may carry another request.
async fn round_trip(
    connection: &mut Connection,
    request: &RequestDescriptor,
    payload: Option<Bytes>,
) -> Result<(Response, bool)> {
    connection
        .write_all(&encode_request(request, payload.as_deref()))
        .await?;
    connection.flush().await?;

    let (status, headers) = loop {
        let (status, headers) = read_head(connection).await?;
        // Skip interim responses such as 100 Continue
        if !status.is_informational() {
            break (status, headers);
        }
    };

    let (body, delimited) = if request.options.method == Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        (Bytes::new(), true)
    } else if is_chunked(&headers) {
        (read_chunked(connection).await?, true)
    } else if let Some(length) = content_length(&headers)? {
        check_body_size(length)?;
        let mut body = vec![0u8; length];
        connection.read_exact(&mut body).await?;
        (Bytes::from(body), true)
    } else {
        let mut body = Vec::new();
        let limit = MAX_BODY_BYTES as u64 + 1;
        (&mut *connection).take(limit).read_to_end(&mut body).await?;
        check_body_size(body.len())?;
        (Bytes::from(body), false)
    };

    Ok((
        Response {
            status,
            headers,
            body,
        },
        delimited,
    ))
}

async fn read_line(connection: &mut Connection, budget: &mut usize) -> Result<String> {
    let mut line = String::new();
    let n = connection.read_line(&mut line).await?;
    if n == 0 {
        return Err(Error::ConnectionClosed);
    }
    *budget = budget
        .checked_sub(n)
        .ok_or_else(|| Error::InvalidResponse("response head too large".into()))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn read_head(connection: &mut Connection) -> Result<(StatusCode, HeaderMap)> {
    let mut budget = MAX_HEAD_BYTES;
    let status_line = read_line(connection, &mut budget).await?;

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(Error::InvalidResponse(format!(
            "Unrecognized status line: {}",
            status_line
        )));
    }
    let status = parts
        .next()
        .and_then(|code| StatusCode::from_bytes(code.as_bytes()).ok())
        .ok_or_else(|| Error::InvalidResponse(format!("Invalid status line: {}", status_line)))?;

    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(connection, &mut budget).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidResponse(format!("Invalid header line: {}", line)))?;
        headers.append(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }

    Ok((status, headers))
}

fn check_body_size(length: usize) -> Result<()> {
    if length > MAX_BODY_BYTES {
        return Err(Error::InvalidResponse(format!(
            "response body of {} bytes exceeds {} byte limit",
            length, MAX_BODY_BYTES
        )));
    }
    Ok(())
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("chunked"))
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>> {
    match headers.get(CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map(Some)
            .ok_or_else(|| Error::InvalidResponse("Invalid content-length".into())),
        None => Ok(None),
    }
}

async fn read_chunked(connection: &mut Connection) -> Result<Bytes> {
    let mut body = BytesMut::new();
    let mut budget = MAX_HEAD_BYTES;

    loop {
        let size_line = read_line(connection, &mut budget).await?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| Error::InvalidResponse(format!("Invalid chunk size: {}", size_line)))?;

        if size == 0 {
            // Trailers end with an empty line
            while !read_line(connection, &mut budget).await?.is_empty() {}
            break;
        }

        let start = body.len();
        let end = start.checked_add(size).ok_or_else(|| {
            Error::InvalidResponse(format!("Chunk size overflow: {}", size_line))
        })?;
        check_body_size(end)?;
        body.resize(end, 0);
        connection.read_exact(&mut body[start..]).await?;

        let mut crlf = [0u8; 2];
        connection.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(Error::InvalidResponse("Missing chunk terminator".into()));
        }
    }

    Ok(body.freeze())
}
