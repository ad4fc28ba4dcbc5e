//! Handshake scenarios over real sockets

use super::{NtlmTestServer, TestServerConfig};
use crate::auth::ntlm::{NtlmAuthenticateMessage, NtlmNegotiateMessage};
use crate::auth::{Credentials, NtlmCredentialHandler, RequestHandler};
use crate::error::Error;
use crate::protocol::{RequestDescriptor, RequestOptions};
use crate::transport::tcp::TcpTransport;
use crate::transport::HttpTransport;
use bytes::Bytes;
use http::header::HeaderName;
use http::{Method, StatusCode};
use url::Url;

fn alice() -> Credentials {
    Credentials::new("alice", "Password", "CORP", "WS01")
}

fn request(server: &NtlmTestServer, method: Method, path: &str) -> RequestDescriptor {
    let options = RequestOptions::new(method)
        .header(HeaderName::from_static("x-trace-id"), "42")
        .unwrap();
    RequestDescriptor::new(Url::parse(&server.url(path)).unwrap(), options).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_runs_on_one_connection() {
        let server = NtlmTestServer::start(TestServerConfig::default())
            .await
            .unwrap();
        let transport = TcpTransport::new();
        let handler = NtlmCredentialHandler::new(alice());
        let request = request(&server, Method::GET, "/secure");

        let first = transport.send_raw(&request, None).await.unwrap();
        assert!(handler.can_handle_authentication(&first));

        let response = handler
            .handle_authentication(&transport, &request, None)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"Hello, alice");

        let events = server.events();
        assert_eq!(events.len(), 3);
        assert_ne!(events[0].connection, events[1].connection);
        assert_eq!(events[1].connection, events[2].connection);
        assert!(events.iter().all(|e| e.request_line == "GET /secure HTTP/1.1"));

        // Negotiate carries only the handler's headers
        assert_eq!(events[1].header("x-trace-id"), None);
        assert_eq!(events[1].header("connection"), Some("keep-alive"));
        let negotiate = NtlmNegotiateMessage::parse(&events[1].ntlm_message().unwrap()).unwrap();
        assert_eq!(negotiate.domain_name, "CORP");
        assert_eq!(negotiate.workstation_name, "WS01");

        // Authenticate merges the caller's headers
        assert_eq!(events[2].header("x-trace-id"), Some("42"));
        assert_eq!(events[2].header("connection"), Some("close"));
        let authenticate =
            NtlmAuthenticateMessage::parse(&events[2].ntlm_message().unwrap()).unwrap();
        assert_eq!(authenticate.user_name, "alice");
        assert_eq!(authenticate.domain_name, "CORP");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_wrong_password_returns_final_401() {
        let server = NtlmTestServer::start(TestServerConfig::default())
            .await
            .unwrap();
        let handler =
            NtlmCredentialHandler::new(Credentials::new("alice", "wrong", "CORP", "WS01"));

        let response = handler
            .handle_authentication(
                &TcpTransport::new(),
                &request(&server, Method::GET, "/"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(server.events().len(), 2);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_payload_sent_on_both_steps() {
        let server = NtlmTestServer::start(TestServerConfig::default())
            .await
            .unwrap();
        let handler = NtlmCredentialHandler::new(alice());

        let response = handler
            .handle_authentication(
                &TcpTransport::new(),
                &request(&server, Method::POST, "/submit"),
                Some(Bytes::from_static(b"name=alice")),
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let events = server.events();
        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.request_line, "POST /submit HTTP/1.1");
            assert_eq!(event.body, b"name=alice");
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn test_missing_challenge_fails_after_one_request() {
        let server = NtlmTestServer::start(TestServerConfig {
            omit_challenge: true,
            ..TestServerConfig::default()
        })
        .await
        .unwrap();
        let handler = NtlmCredentialHandler::new(alice());

        let result = handler
            .handle_authentication(
                &TcpTransport::new(),
                &request(&server, Method::GET, "/"),
                None,
            )
            .await;
        assert!(matches!(result, Err(Error::ChallengeMissing)));
        assert_eq!(server.events().len(), 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_handshakes_use_separate_connections() {
        let server = NtlmTestServer::start(TestServerConfig::default())
            .await
            .unwrap();
        let transport = TcpTransport::new();
        let handler = NtlmCredentialHandler::new(alice());
        let first = request(&server, Method::GET, "/a");
        let second = request(&server, Method::GET, "/b");

        let (a, b) = tokio::join!(
            handler.handle_authentication(&transport, &first, None),
            handler.handle_authentication(&transport, &second, None),
        );
        assert_eq!(a.unwrap().status, StatusCode::OK);
        assert_eq!(b.unwrap().status, StatusCode::OK);

        let events = server.events();
        assert_eq!(events.len(), 4);
        for path in ["/a", "/b"] {
            let line = format!("GET {} HTTP/1.1", path);
            let connections: Vec<usize> = events
                .iter()
                .filter(|e| e.request_line == line)
                .map(|e| e.connection)
                .collect();
            assert_eq!(connections.len(), 2);
            assert_eq!(connections[0], connections[1]);
        }
        server.shutdown();
    }

    #[cfg(feature = "client")]
    #[tokio::test]
    async fn test_client_authenticates_transparently() {
        use crate::client::HttpClient;
        use http::HeaderMap;
        use std::sync::Arc;

        let server = NtlmTestServer::start(TestServerConfig::default())
            .await
            .unwrap();
        let mut client = HttpClient::new();
        client.add_handler(Arc::new(NtlmCredentialHandler::new(alice())));

        let response = client
            .request(Method::GET, &server.url("/report"), HeaderMap::new(), None)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"Hello, alice");

        let events = server.events();
        assert_eq!(events.len(), 3);
        assert!(events[0].header("authorization").is_none());
        assert!(events[2]
            .header("user-agent")
            .unwrap()
            .starts_with("rust-ntlm-http/"));
        server.shutdown();
    }

    #[cfg(feature = "client")]
    #[tokio::test]
    async fn test_client_without_handler_returns_demand() {
        use crate::client::HttpClient;

        let server = NtlmTestServer::start(TestServerConfig::default())
            .await
            .unwrap();
        let response = HttpClient::new().get(&server.url("/")).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            response
                .header_str(&http::header::WWW_AUTHENTICATE)
                .as_deref(),
            Some("NTLM, Negotiate")
        );
        server.shutdown();
    }
}
