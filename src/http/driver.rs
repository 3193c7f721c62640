//! The per-connection request loop.
//!
//! # Data Flow
//! ```text
//! read head ──▶ request framing ──▶ handler ──▶ response framing ──▶ write
//!     ▲                                                                 │
//!     │            keep-alive: drain unread request body                │
//!     └─────────────────────────────────────────────────────────────────┤
//!                                            101 + upgrade: WebSocket ◀─┤
//!                                            must close: shut down   ◀──┘
//! ```
//!
//! # Design Decisions
//! - Malformed requests get a bodiless error response, then the connection
//!   closes; there is no resynchronisation mid-stream
//! - An invalid response is a handler bug: it is logged and the connection
//!   is dropped without writing anything
//! - Shutdown only interrupts a connection waiting for its next request

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::transport::{self, Transport};
use crate::websocket::WebSocket;

use super::body::Body;
use super::error::{Error, Result};
use super::framing::{request_framing, response_framing, RequestSummary};
use super::inbound::{Inbound, Limits, RequestHead};
use super::request::Request;
use super::server::Handler;
use super::writer::HttpWriter;

/// Serve HTTP/1.1 requests on `stream` until it closes.
pub async fn serve_connection<T: Transport>(
    stream: T,
    handler: Arc<dyn Handler>,
    config: Arc<ServerConfig>,
    remote_addr: Option<SocketAddr>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let (buffer, write) = transport::split(stream, config.limits.read_buffer_size);
    let inbound = Arc::new(Mutex::new(Inbound::new(buffer, Limits::from(&config.limits))));
    let mut writer = HttpWriter::new(write);

    loop {
        let head = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
            head = async { inbound.lock().await.read_head().await } => head,
        };

        let RequestHead { start, headers } = match head {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(()),
            Err(e) => return reject(&mut writer, e).await,
        };

        let framing = match request_framing(start.version, &headers) {
            Ok(framing) => framing,
            Err(e) => return reject(&mut writer, e).await,
        };

        tracing::debug!(method = %start.method, uri = %start.uri, version = %start.version, "Request");

        let summary = RequestSummary::new(&start.method, start.version, &headers);
        let length = framing.body.known_length();
        let generation = inbound.lock().await.begin_body(framing.body);
        let request = Request::new(start.method, start.uri, start.version, headers)
            .with_encodings(framing.encodings)
            .with_body(Body::incoming(Arc::clone(&inbound), generation, length))
            .with_remote_addr(remote_addr);

        let mut response = handler.call(request).await;
        let status = response.status();
        let body_length = response.body_mut().len();
        let framing = match response_framing(&summary, status, response.headers_mut(), body_length) {
            Ok(framing) => framing,
            Err(e) => {
                tracing::warn!(error = %e, status, "Handler produced an invalid response");
                let _ = writer.shutdown().await;
                return Err(e);
            }
        };

        let upgrade = response.take_upgrade();
        writer.write_status_line(status, response.reason());
        writer.write_headers(response.headers());
        writer.send(response.body_mut(), framing.mode).await?;
        tracing::debug!(status, must_close = framing.must_close, "Response sent");

        if let (101, Some(session)) = (status, upgrade) {
            let buffer = inbound.lock().await.take_buffer();
            let socket = WebSocket::new(buffer, writer.into_inner(), &config.websocket, shutdown, remote_addr);
            tracing::debug!("Switched to WebSocket");
            session(socket).await;
            return Ok(());
        }

        if framing.must_close {
            let _ = writer.shutdown().await;
            return Ok(());
        }

        inbound.lock().await.drain_body().await?;
    }
}

/// Answer a malformed request and close, or pass the error on if it is not the client's fault.
async fn reject(writer: &mut HttpWriter, error: Error) -> Result<()> {
    let Some((status, reason)) = error.status() else {
        return match error {
            Error::ConnectionClosed => Ok(()),
            other => Err(other),
        };
    };
    tracing::debug!(error = %error, status, "Rejecting request");
    writer.send_error(status, reason).await?;
    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::http::Response;
    use crate::lifecycle::Shutdown;

    fn spawn_driver<H: Handler>(handler: H, config: ServerConfig) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_connection(
            server,
            Arc::new(handler),
            Arc::new(config),
            None,
            ShutdownSignal::never(),
        ));
        client
    }

    async fn exchange(client: &mut DuplexStream, request: &str) -> String {
        client.write_all(request.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        out
    }

    async fn hello(_request: Request) -> Response {
        Response::text(200, "hi")
    }

    #[tokio::test]
    async fn keep_alive_serves_pipelined_requests() {
        let mut client = spawn_driver(hello, ServerConfig::default());
        let out = exchange(
            &mut client,
            "GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(!out.contains("Connection: close"));
    }

    #[tokio::test]
    async fn unread_body_is_drained_before_next_request() {
        let mut client = spawn_driver(hello, ServerConfig::default());
        let out = exchange(
            &mut client,
            "POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhelloGET / HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    }

    #[tokio::test]
    async fn malformed_request_gets_400_and_close() {
        let mut client = spawn_driver(hello, ServerConfig::default());
        let out = exchange(&mut client, "GET / HTTP/1.1\r\n\r\n").await;
        assert_eq!(out, "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    }

    #[tokio::test]
    async fn long_request_line_gets_414() {
        let mut config = ServerConfig::default();
        config.limits.max_start_line_length = 32;
        let mut client = spawn_driver(hello, config);
        let uri = "/".repeat(64);
        let out = exchange(&mut client, &format!("GET {uri} HTTP/1.1\r\nHost: x\r\n\r\n")).await;
        assert!(out.starts_with("HTTP/1.1 414 "));
    }

    #[tokio::test]
    async fn http10_request_closes_after_response() {
        let mut client = spawn_driver(hello, ServerConfig::default());
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut out = String::new();
        tokio::time::timeout(Duration::from_secs(1), client.read_to_string(&mut out))
            .await
            .unwrap()
            .unwrap();
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn invalid_response_drops_connection_silently() {
        let handler = |_request: Request| async {
            Response::new(204).with_header("Content-Length", "3").with_body("abc")
        };
        let mut client = spawn_driver(handler, ServerConfig::default());
        let out = exchange(&mut client, "GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connection() {
        let shutdown = Shutdown::new();
        let (mut client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(serve_connection(
            server,
            Arc::new(hello),
            Arc::new(ServerConfig::default()),
            None,
            shutdown.signal(),
        ));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap().unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }
}
