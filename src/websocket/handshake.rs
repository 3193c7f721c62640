//! Opening handshake (RFC 6455 section 4.2).
//!
//! # Data Flow
//! ```text
//! Request ──▶ validate ──▶ Ok(key)  ──▶ 101 + Sec-WebSocket-Accept + session handler
//!                     └──▶ Err(e)   ──▶ 426 (version) or 400, connection continues
//! ```

use std::future::Future;

use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::http::{Request, Response, Version};

use super::connection::WebSocket;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const WS_VERSION: &str = "13";

/// Why an upgrade request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("upgrade requests must use GET")]
    Method,

    #[error("upgrade requests must use HTTP/1.1")]
    Version,

    #[error("missing or wrong Upgrade header")]
    Upgrade,

    #[error("Connection header does not contain Upgrade")]
    Connection,

    #[error("unsupported Sec-WebSocket-Version")]
    WebSocketVersion,

    #[error("missing Sec-WebSocket-Key")]
    MissingKey,

    #[error("Sec-WebSocket-Key is not 16 base64-encoded bytes")]
    InvalidKey,
}

impl HandshakeError {
    /// The refusal sent back instead of a 101.
    pub fn to_response(self) -> Response {
        match self {
            HandshakeError::WebSocketVersion => {
                Response::empty(426).with_header("Sec-WebSocket-Version", WS_VERSION)
            }
            _ => Response::empty(400),
        }
    }
}

/// Compute `Sec-WebSocket-Accept` for a client key.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Check an upgrade request, returning the client key.
pub fn validate(request: &Request) -> Result<String, HandshakeError> {
    if request.method() != "GET" {
        return Err(HandshakeError::Method);
    }
    if request.version() != Version::Http11 {
        return Err(HandshakeError::Version);
    }

    let headers = request.headers();
    let upgrade = headers.get("Upgrade").ok_or(HandshakeError::Upgrade)?;
    if !upgrade.trim().eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::Upgrade);
    }

    let connection = headers.get("Connection").ok_or(HandshakeError::Connection)?;
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(HandshakeError::Connection);
    }

    match headers.get("Sec-WebSocket-Version") {
        Some(version) if version.trim() == WS_VERSION => {}
        _ => return Err(HandshakeError::WebSocketVersion),
    }

    let key = headers.get("Sec-WebSocket-Key").ok_or(HandshakeError::MissingKey)?;
    let key = key.trim();
    match base64::engine::general_purpose::STANDARD.decode(key) {
        Ok(decoded) if decoded.len() == 16 => Ok(key.to_string()),
        _ => Err(HandshakeError::InvalidKey),
    }
}

/// The 101 response accepting `request`, without a session handler.
pub fn accept(request: &Request) -> Result<Response, HandshakeError> {
    let key = validate(request)?;
    Ok(Response::new(101)
        .with_header("Upgrade", "websocket")
        .with_header("Connection", "Upgrade")
        .with_header("Sec-WebSocket-Accept", compute_accept_key(&key)))
}

/// Answer `request` with a 101 that runs `handler` on the upgraded
/// connection, or with the appropriate refusal.
pub fn upgrade<F, Fut>(request: &Request, handler: F) -> Response
where
    F: FnOnce(WebSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    match accept(request) {
        Ok(response) => response.with_upgrade(handler),
        Err(e) => {
            tracing::debug!(error = %e, uri = %request.uri(), "WebSocket handshake refused");
            e.to_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    fn request(pairs: &[(&str, &str)]) -> Request {
        Request::new("GET", "/chat", Version::Http11, pairs.iter().map(|&(n, v)| (n, v)).collect())
    }

    fn valid() -> Vec<(&'static str, &'static str)> {
        vec![
            ("Host", "server.example.com"),
            ("Upgrade", "websocket"),
            ("Connection", "keep-alive, Upgrade"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "13"),
        ]
    }

    fn without(name: &str) -> Vec<(&'static str, &'static str)> {
        valid().into_iter().filter(|(n, _)| *n != name).collect()
    }

    fn with(name: &str, value: &'static str) -> Vec<(&'static str, &'static str)> {
        let mut pairs = without(name);
        let name = valid().into_iter().find(|(n, _)| *n == name).map(|(n, _)| n).unwrap();
        pairs.push((name, value));
        pairs
    }

    #[test]
    fn rfc_accept_key() {
        assert_eq!(compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn accepts_valid_upgrade() {
        let response = accept(&request(&valid())).unwrap();
        assert_eq!(response.status(), 101);
        assert_eq!(
            response.headers().get("Sec-WebSocket-Accept").as_deref(),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
        assert_eq!(response.headers().get("upgrade").as_deref(), Some("websocket"));
    }

    #[test]
    fn upgrade_header_is_case_insensitive() {
        assert!(validate(&request(&with("Upgrade", "WebSocket"))).is_ok());
    }

    #[test]
    fn rejects_wrong_method_and_version() {
        let post = Request::new("POST", "/", Version::Http11, valid().into_iter().collect::<Headers>());
        assert_eq!(validate(&post), Err(HandshakeError::Method));

        let old = Request::new("GET", "/", Version::Http10, valid().into_iter().collect::<Headers>());
        assert_eq!(validate(&old), Err(HandshakeError::Version));
    }

    #[test]
    fn rejects_missing_headers() {
        assert_eq!(validate(&request(&without("Upgrade"))), Err(HandshakeError::Upgrade));
        assert_eq!(validate(&request(&without("Connection"))), Err(HandshakeError::Connection));
        assert_eq!(validate(&request(&without("Sec-WebSocket-Key"))), Err(HandshakeError::MissingKey));
        assert_eq!(
            validate(&request(&without("Sec-WebSocket-Version"))),
            Err(HandshakeError::WebSocketVersion)
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(validate(&request(&with("Upgrade", "h2c"))), Err(HandshakeError::Upgrade));
        assert_eq!(validate(&request(&with("Connection", "close"))), Err(HandshakeError::Connection));
        assert_eq!(validate(&request(&with("Sec-WebSocket-Version", "8"))), Err(HandshakeError::WebSocketVersion));
        assert_eq!(validate(&request(&with("Sec-WebSocket-Key", "c2hvcnQ="))), Err(HandshakeError::InvalidKey));
        assert_eq!(validate(&request(&with("Sec-WebSocket-Key", "not base64 at all!!!!!!!"))), Err(HandshakeError::InvalidKey));
    }

    #[test]
    fn refusals_map_to_status() {
        let response = HandshakeError::WebSocketVersion.to_response();
        assert_eq!(response.status(), 426);
        assert_eq!(response.headers().get("Sec-WebSocket-Version").as_deref(), Some("13"));
        assert_eq!(HandshakeError::InvalidKey.to_response().status(), 400);
    }

    #[test]
    fn refused_upgrade_has_no_handler() {
        let response = upgrade(&request(&without("Upgrade")), |_socket| async {});
        assert_eq!(response.status(), 400);
        assert!(!response.is_upgrade());

        let response = upgrade(&request(&valid()), |_socket| async {});
        assert!(response.is_upgrade());
    }
}
