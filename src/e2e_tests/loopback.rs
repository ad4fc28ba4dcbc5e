//! Loopback NTLM server for client-side end-to-end tests
//!
//! Listens on `127.0.0.1:0` and behaves like an IIS site with Windows
//! authentication: anonymous requests get `401 WWW-Authenticate: NTLM`, a
//! negotiate message gets a challenge on the same keep-alive connection, and
//! an authenticate message is verified against the configured password.

use crate::auth::codec::{decode_token, encode_token};
use crate::auth::ntlm::{NtlmAuthenticateMessage, NtlmChallengeMessage, NtlmNegotiateMessage};
use crate::auth::ntlm_crypto::{hmac_md5, ntlmv2_hash};
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Behaviour of the test server
#[derive(Debug, Clone)]
pub struct TestServerConfig {
    /// Password every account is checked against
    pub password: String,
    /// Server challenge sent in the type 2 message
    pub server_challenge: [u8; 8],
    /// Answer the negotiate step without a `www-authenticate` header
    pub omit_challenge: bool,
}

impl Default for TestServerConfig {
    fn default() -> Self {
        Self {
            password: "Password".to_string(),
            server_challenge: *b"\x01\x23\x45\x67\x89\xab\xcd\xef",
            omit_challenge: false,
        }
    }
}

/// One request as the server saw it
#[derive(Debug, Clone)]
pub struct ServerEvent {
    /// Sequence number of the TCP connection the request arrived on
    pub connection: usize,
    pub request_line: String,
    /// Lowercased header names with their values, in arrival order
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ServerEvent {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The raw NTLM message in the `authorization` header, if any.
    pub fn ntlm_message(&self) -> Option<Vec<u8>> {
        decode_token(self.header("authorization")?).ok()
    }
}

/// Handle to a running test server
pub struct NtlmTestServer {
    addr: SocketAddr,
    events: Arc<Mutex<Vec<ServerEvent>>>,
    handle: JoinHandle<()>,
}

impl NtlmTestServer {
    pub async fn start(config: TestServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let events = Arc::new(Mutex::new(Vec::new()));
        let config = Arc::new(config);

        let shared_events = events.clone();
        let handle = tokio::spawn(async move {
            let counter = AtomicUsize::new(0);
            while let Ok((stream, _)) = listener.accept().await {
                let connection = counter.fetch_add(1, Ordering::SeqCst);
                let config = config.clone();
                let events = shared_events.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, connection, &config, &events).await {
                        tracing::debug!("Test connection {} ended: {}", connection, e);
                    }
                });
            }
        });

        Ok(Self {
            addr,
            events,
            handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

async fn read_request(
    reader: &mut BufReader<TcpStream>,
    connection: usize,
) -> Result<Option<ServerEvent>> {
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(None);
    }

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::ConnectionClosed);
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::ParseError(format!("bad header line {:?}", line)))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    Ok(Some(ServerEvent {
        connection,
        request_line: request_line.trim_end().to_string(),
        headers,
        body,
    }))
}

/// Check the NTProofStr of an authenticate message.
fn verify(
    message: &NtlmAuthenticateMessage,
    server_challenge: &[u8; 8],
    password: &str,
) -> Result<bool> {
    if message.nt_response.len() < 16 {
        return Ok(false);
    }
    let (proof, blob) = message.nt_response.split_at(16);
    let hash = ntlmv2_hash(&message.user_name, &message.domain_name, password)?;
    let expected = hmac_md5(&hash, &[&server_challenge[..], blob])?;
    Ok(expected == proof)
}

fn response(status: &str, headers: &[(&str, String)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {}\r\n", status);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    out
}

async fn serve_connection(
    stream: TcpStream,
    connection: usize,
    config: &TestServerConfig,
    events: &Mutex<Vec<ServerEvent>>,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    // Challenge issued on this connection; NTLM state never crosses sockets
    let mut issued: Option<[u8; 8]> = None;

    while let Some(event) = read_request(&mut reader, connection).await? {
        let message = event.ntlm_message();
        if let Ok(mut events) = events.lock() {
            events.push(event);
        }

        let close = vec![("Connection", "close".to_string())];
        let demand = vec![
            ("WWW-Authenticate", "NTLM".to_string()),
            ("WWW-Authenticate", "Negotiate".to_string()),
            ("Connection", "close".to_string()),
        ];

        let (reply, keep_alive) = match message.as_deref() {
            Some(data) if data.get(8) == Some(&1) => {
                let negotiate = NtlmNegotiateMessage::parse(data)?;
                tracing::debug!("Test server got negotiate from {:?}", negotiate.domain_name);
                let mut headers = vec![("Connection", "keep-alive".to_string())];
                if !config.omit_challenge {
                    let challenge = NtlmChallengeMessage::new("TESTDOM", config.server_challenge);
                    headers.push(("WWW-Authenticate", encode_token(&challenge.serialize()?)));
                    issued = Some(config.server_challenge);
                }
                (response("401 Unauthorized", &headers, ""), true)
            }
            Some(data) if data.get(8) == Some(&3) => {
                let authenticate = NtlmAuthenticateMessage::parse(data)?;
                let accepted = match &issued {
                    Some(challenge) => verify(&authenticate, challenge, &config.password)?,
                    None => false,
                };
                if accepted {
                    let body = format!("Hello, {}", authenticate.user_name);
                    (response("200 OK", &close, &body), false)
                } else {
                    (response("401 Unauthorized", &demand, ""), false)
                }
            }
            _ => (response("401 Unauthorized", &demand, ""), false),
        };

        reader.get_mut().write_all(reply.as_bytes()).await?;
        if !keep_alive {
            break;
        }
    }

    Ok(())
}
