//! Transport layer
//!
//! Handlers never touch sockets. They hand a [`RequestDescriptor`] to an
//! [`HttpTransport`] and get a fully read [`Response`] back. Connection reuse
//! is expressed through a [`ConnectionAgent`] carried in the request options.

use crate::error::Result;
use crate::protocol::{RequestDescriptor, Response};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::io::BufStream;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod tcp;

/// A buffered connection parked in an agent between requests
pub type Connection = BufStream<TcpStream>;

/// Trait for HTTP transport implementations
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request and read the whole response. No redirects, no
    /// authentication, no retries.
    async fn send_raw(&self, request: &RequestDescriptor, payload: Option<Bytes>)
        -> Result<Response>;

    /// Whether the request needs a secure connection
    fn is_secure(&self, request: &RequestDescriptor) -> bool {
        request.scheme.is_secure()
    }
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn send_raw(
        &self,
        request: &RequestDescriptor,
        payload: Option<Bytes>,
    ) -> Result<Response> {
        (**self).send_raw(request, payload).await
    }

    fn is_secure(&self, request: &RequestDescriptor) -> bool {
        (**self).is_secure(request)
    }
}

/// Connection type an agent hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Plain,
    Secure,
}

struct AgentInner {
    id: Uuid,
    kind: AgentKind,
    slot: Mutex<Option<Connection>>,
}

/// Keep-alive agent holding at most one connection.
///
/// Clones share the same slot, so every request bound to clones of one agent
/// travels over the same TCP connection for as long as the server keeps it
/// open.
#[derive(Clone)]
pub struct ConnectionAgent {
    inner: Arc<AgentInner>,
}

impl ConnectionAgent {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                id: Uuid::new_v4(),
                kind,
                slot: Mutex::new(None),
            }),
        }
    }

    pub fn plain() -> Self {
        Self::new(AgentKind::Plain)
    }

    pub fn secure() -> Self {
        Self::new(AgentKind::Secure)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> AgentKind {
        self.inner.kind
    }

    /// Whether two handles refer to the same agent
    pub fn same_agent(&self, other: &ConnectionAgent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Take the parked connection, leaving the slot empty while in use
    pub async fn take_connection(&self) -> Option<Connection> {
        self.inner.slot.lock().await.take()
    }

    /// Park a connection for the next request bound to this agent
    pub async fn park_connection(&self, connection: Connection) {
        *self.inner.slot.lock().await = Some(connection);
    }

    pub async fn has_connection(&self) -> bool {
        self.inner.slot.lock().await.is_some()
    }

    /// Drop the parked connection, closing it
    pub async fn release(&self) {
        if self.inner.slot.lock().await.take().is_some() {
            tracing::debug!("Agent {} released its connection", self.inner.id);
        }
    }
}

impl fmt::Debug for ConnectionAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionAgent")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_identity() {
        let agent = ConnectionAgent::plain();
        let clone = agent.clone();
        let other = ConnectionAgent::plain();

        assert!(agent.same_agent(&clone));
        assert_eq!(agent.id(), clone.id());
        assert!(!agent.same_agent(&other));
        assert_ne!(agent.id(), other.id());
        assert_eq!(ConnectionAgent::secure().kind(), AgentKind::Secure);
    }

    #[tokio::test]
    async fn test_agent_starts_empty() {
        let agent = ConnectionAgent::plain();
        assert!(!agent.has_connection().await);
        assert!(agent.take_connection().await.is_none());
        agent.release().await;
    }
}
