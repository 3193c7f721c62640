//! Demonstration handlers selectable from the command line.
//!
//! - `hello`: fixed text response
//! - `echo`: returns the request body; on a WebSocket upgrade, echoes messages
//! - `headers`: describes the request as JSON
//! - `chat`: WebSocket room broadcasting every text message to the other members

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::ValueEnum;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::http::{Handler, Request, Response, Version};
use crate::websocket::{self, CloseMessage, Message, WebSocket};

/// Which demonstration to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoKind {
    Hello,
    Echo,
    Headers,
    Chat,
}

/// A [`Handler`] serving one of the demonstrations.
#[derive(Debug, Clone)]
pub struct Demo {
    kind: DemoKind,
    room: Arc<ChatRoom>,
}

impl Demo {
    pub fn new(kind: DemoKind) -> Self {
        Self {
            kind,
            room: Arc::new(ChatRoom::default()),
        }
    }
}

impl Handler for Demo {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        let kind = self.kind;
        let room = Arc::clone(&self.room);
        Box::pin(async move {
            match kind {
                DemoKind::Hello => hello(request),
                DemoKind::Echo => echo(request),
                DemoKind::Headers => describe(request),
                DemoKind::Chat => chat(request, room),
            }
        })
    }
}

fn is_upgrade(request: &Request) -> bool {
    request.headers().contains("Upgrade")
}

fn hello(_request: Request) -> Response {
    Response::text(200, "Hello, World!\n")
}

fn echo(mut request: Request) -> Response {
    if is_upgrade(&request) {
        return websocket::upgrade(&request, echo_session);
    }

    let body = request.take_body();
    let content_type = request
        .headers()
        .get("Content-Type")
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let response = Response::new(200).with_header("Content-Type", content_type);
    let response = match body.len() {
        Some(length) => response.with_header("Content-Length", length.to_string()),
        None if request.version() == Version::Http11 => response.with_header("Transfer-Encoding", "chunked"),
        None => response,
    };
    response.with_body(body)
}

async fn echo_session(socket: WebSocket) {
    loop {
        match socket.receive().await {
            Ok(Some(message)) => {
                let kind = message.kind();
                if let Err(e) = socket.send(Message::new(kind, message.into_body())).await {
                    tracing::debug!(error = %e, "Echo send failed");
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "Echo session ended");
                return;
            }
        }
    }
}

#[derive(Serialize)]
struct RequestDescription<'a> {
    method: &'a str,
    uri: &'a str,
    path: &'a str,
    version: &'a str,
    remote_addr: Option<String>,
    headers: Vec<(&'a str, &'a str)>,
}

fn describe(request: Request) -> Response {
    let description = RequestDescription {
        method: request.method(),
        uri: request.uri(),
        path: request.path(),
        version: request.version().as_str(),
        remote_addr: request.remote_addr().map(|addr| addr.to_string()),
        headers: request
            .headers()
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| (name, value.as_str())))
            .collect(),
    };
    match serde_json::to_string_pretty(&description) {
        Ok(json) => {
            let mut response = Response::text(200, json);
            response.headers_mut().set("Content-Type", "application/json");
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize request description");
            Response::empty(500)
        }
    }
}

/// Members of the chat room, keyed by join order.
#[derive(Debug, Default)]
pub struct ChatRoom {
    members: DashMap<u64, WebSocket>,
    next_id: AtomicU64,
}

impl ChatRoom {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn others(&self, id: u64) -> Vec<WebSocket> {
        self.members
            .iter()
            .filter(|member| *member.key() != id)
            .map(|member| member.value().clone())
            .collect()
    }

    /// Run one member's session until it leaves.
    pub async fn join(&self, socket: WebSocket) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.members.insert(id, socket.clone());
        tracing::info!(member = id, members = self.len(), "Chat member joined");

        loop {
            let message = match socket.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(member = id, error = %e, "Chat member dropped");
                    break;
                }
            };
            if !message.is_text() {
                continue;
            }
            let text = match message.into_text().await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(member = id, error = %e, "Unreadable chat message");
                    break;
                }
            };
            for other in self.others(id) {
                if let Err(e) = other.send(Message::text(text.clone())).await {
                    tracing::debug!(error = %e, "Chat broadcast failed");
                }
            }
        }

        self.members.remove(&id);
        if !socket.is_closed() {
            let _ = socket.close(CloseMessage::normal()).await;
        }
        tracing::info!(member = id, members = self.len(), "Chat member left");
    }
}

fn chat(request: Request, room: Arc<ChatRoom>) -> Response {
    if !is_upgrade(&request) {
        return Response::text(426, "This endpoint speaks WebSocket only\n").with_header("Upgrade", "websocket");
    }
    websocket::upgrade(&request, move |socket| async move { room.join(socket).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    fn request(method: &str, headers: &[(&str, &str)]) -> Request {
        Request::new(method, "/demo?x=1", Version::Http11, headers.iter().map(|&(n, v)| (n, v)).collect::<Headers>())
    }

    #[tokio::test]
    async fn hello_says_hello() {
        let mut response = Handler::call(&Demo::new(DemoKind::Hello), request("GET", &[])).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.body_mut().to_text().await.unwrap(), "Hello, World!\n");
    }

    #[tokio::test]
    async fn echo_returns_body_with_length() {
        let request = request("POST", &[("Content-Type", "text/plain")]).with_body("ping".into());
        let mut response = Handler::call(&Demo::new(DemoKind::Echo), request).await;
        assert_eq!(response.headers().get("Content-Length").as_deref(), Some("4"));
        assert_eq!(response.headers().get("Content-Type").as_deref(), Some("text/plain"));
        assert_eq!(response.body_mut().to_text().await.unwrap(), "ping");
    }

    #[tokio::test]
    async fn echo_streams_unsized_bodies_chunked() {
        let body = crate::http::Body::from_reader(&b"stream"[..]);
        let response = Handler::call(&Demo::new(DemoKind::Echo), request("POST", &[]).with_body(body)).await;
        assert_eq!(response.headers().get("Transfer-Encoding").as_deref(), Some("chunked"));
    }

    #[tokio::test]
    async fn headers_describes_request_as_json() {
        let mut response =
            Handler::call(&Demo::new(DemoKind::Headers), request("GET", &[("Host", "example"), ("Accept", "*/*")])).await;
        assert_eq!(response.headers().get("Content-Type").as_deref(), Some("application/json"));
        let json: serde_json::Value = serde_json::from_str(&response.body_mut().to_text().await.unwrap()).unwrap();
        assert_eq!(json["path"], "/demo");
        assert_eq!(json["version"], "HTTP/1.1");
        assert_eq!(json["headers"][1][0], "Accept");
    }

    #[tokio::test]
    async fn chat_requires_upgrade() {
        let response = Handler::call(&Demo::new(DemoKind::Chat), request("GET", &[])).await;
        assert_eq!(response.status(), 426);
        assert!(!response.is_upgrade());
    }
}
