//! Incoming requests as seen by a handler.
//!
//! # Responsibilities
//! - Expose the parsed request line and headers
//! - Hand out the body, which reads lazily from the connection
//! - Expose transfer codings other than the final `chunked`, outermost first
//!
//! # Design Decisions
//! - Headers are parsed before the handler runs so framing errors are
//!   answered by the server, never surfaced to handler code
//! - The body is an owned handle; dropping it unread is fine, the driver
//!   drains what is left before reading the next request

use std::net::SocketAddr;

use super::body::Body;
use super::headers::Headers;
use super::parser::Version;

/// A request on a connection.
#[derive(Debug)]
pub struct Request {
    method: String,
    uri: String,
    version: Version,
    headers: Headers,
    encodings: Vec<String>,
    body: Body,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Build a request by hand, mostly for handler tests.
    pub fn new(method: impl Into<String>, uri: impl Into<String>, version: Version, headers: Headers) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            version,
            headers,
            encodings: Vec::new(),
            body: Body::empty(),
            remote_addr: None,
        }
    }

    pub(crate) fn with_encodings(mut self, encodings: Vec<String>) -> Self {
        self.encodings = encodings;
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub(crate) fn with_remote_addr(mut self, remote_addr: Option<SocketAddr>) -> Self {
        self.remote_addr = remote_addr;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target exactly as sent.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Path component of the request target.
    pub fn path(&self) -> &str {
        let end = self.uri.find(['?', '#']).unwrap_or(self.uri.len());
        &self.uri[..end]
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Codings still applied to the body, innermost first: Content-Encoding
    /// values, then Transfer-Encoding values other than `chunked`.
    ///
    /// The body is handed out still encoded; a handler that understands the
    /// outermost coding may decode it and pop it from this list.
    pub fn encodings(&self) -> &[String] {
        &self.encodings
    }

    pub fn encodings_mut(&mut self) -> &mut Vec<String> {
        &mut self.encodings
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}
