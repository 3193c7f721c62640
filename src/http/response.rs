//! Outgoing responses.
//!
//! # Responsibilities
//! - Carry status, reason phrase, headers and body from a handler
//! - Optionally carry a WebSocket session handler to run after a 101
//!
//! # Design Decisions
//! - Framing headers are the handler's choice; the driver validates them
//!   against the request and only ever adds `Connection: close`
//! - Convenience constructors set Content-Length so keep-alive works
//!   without the handler thinking about it

use std::fmt;
use std::future::Future;

use futures_util::future::BoxFuture;

use super::body::Body;
use super::headers::Headers;
use crate::websocket::WebSocket;

/// Runs a WebSocket session once the 101 response has been written.
pub type UpgradeHandler = Box<dyn FnOnce(WebSocket) -> BoxFuture<'static, ()> + Send>;

/// A response to a request.
pub struct Response {
    status: u16,
    reason: String,
    headers: Headers,
    body: Body,
    upgrade: Option<UpgradeHandler>,
}

impl Response {
    /// A response with the standard reason phrase and no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: canonical_reason(status).to_string(),
            headers: Headers::new(),
            body: Body::empty(),
            upgrade: None,
        }
    }

    /// A bodiless response with `Content-Length: 0`.
    pub fn empty(status: u16) -> Self {
        Self::new(status).with_header("Content-Length", "0")
    }

    /// A `text/plain` response with its length set.
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_header("Content-Length", text.len().to_string())
            .with_body(text)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Run `handler` with the upgraded connection after this response is sent.
    pub fn with_upgrade<F, Fut>(mut self, handler: F) -> Self
    where
        F: FnOnce(WebSocket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.upgrade = Some(Box::new(move |socket: WebSocket| -> BoxFuture<'static, ()> {
            Box::pin(handler(socket))
        }));
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn is_upgrade(&self) -> bool {
        self.upgrade.is_some()
    }

    pub(crate) fn take_upgrade(&mut self) -> Option<UpgradeHandler> {
        self.upgrade.take()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// Standard reason phrase for `status`, empty if unknown.
pub fn canonical_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Content Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}
