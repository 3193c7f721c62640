//! HTTP server setup and the accept loop.
//!
//! # Responsibilities
//! - Accept connections from a bounded [`Listener`]
//! - Run the optional TLS handshake, then the connection driver, per connection
//! - Stop accepting on shutdown and wait (bounded) for connections to finish

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::{ConnectionTracker, Listener, ListenerError};

use super::driver::serve_connection;
use super::error::Error;
use super::request::Request;
use super::response::Response;

/// Application code answering requests.
///
/// Implemented for any `Fn(Request) -> impl Future<Output = Response>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request) -> BoxFuture<'static, Response>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        Box::pin(self(request))
    }
}

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP/1.1 server with WebSocket upgrades.
pub struct HttpServer {
    config: Arc<ServerConfig>,
    handler: Arc<dyn Handler>,
    tls: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new<H: Handler>(config: ServerConfig, handler: H) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            tls: None,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Terminate TLS on every accepted connection.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Open connections, for shutdown progress and tests.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, shutdown: ShutdownSignal) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            tls = self.tls.is_some(),
            "HTTP server starting"
        );

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer_addr, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let guard = self.tracker.track();
            let span = tracing::debug_span!("connection", connection_id = %guard.id(), peer_addr = %peer_addr);
            let handler = Arc::clone(&self.handler);
            let config = Arc::clone(&self.config);
            let tls = self.tls.clone();
            let shutdown = shutdown.clone();

            tokio::spawn(
                async move {
                    let _permit = permit;
                    let _guard = guard;
                    let result = match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => serve_connection(stream, handler, config, Some(peer_addr), shutdown).await,
                            Err(e) => {
                                tracing::debug!(error = %e, "TLS handshake failed");
                                return;
                            }
                        },
                        None => serve_connection(stream, handler, config, Some(peer_addr), shutdown).await,
                    };
                    match result {
                        Ok(()) => tracing::debug!("Connection finished"),
                        Err(Error::Io(e)) => tracing::debug!(error = %e, "Connection I/O error"),
                        Err(e) => tracing::debug!(error = %e, "Connection aborted"),
                    }
                }
                .instrument(span),
            );
        }

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        tracing::info!(
            active_connections = self.tracker.active_count(),
            grace_secs = grace.as_secs(),
            "Draining connections"
        );
        if tokio::time::timeout(grace, self.tracker.wait_idle()).await.is_err() {
            tracing::warn!(
                active_connections = self.tracker.active_count(),
                "Shutdown grace period elapsed with connections still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
