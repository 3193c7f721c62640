//! HTTP/1.1 server engine with a WebSocket (RFC 6455) upgrade path.

pub mod buffer;
pub mod config;
pub mod demo;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod websocket;

pub use config::ServerConfig;
pub use http::{Handler, HttpServer, Request, Response};
pub use lifecycle::Shutdown;
pub use websocket::WebSocket;
