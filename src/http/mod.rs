//! HTTP/1.1 protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! transport
//!     → RecvBuffer (buffer/)
//!     → parser.rs (start line, headers) via inbound.rs (length limits)
//!     → framing.rs (body length, pending codings)
//!     → body.rs (sized / chunked.rs / empty body views)
//!     → Handler (server.rs) → Response
//!     → framing.rs (no-body rules, Connection: close)
//!     → writer.rs (status line, headers, raw or chunked body)
//!     → transport
//!
//! driver.rs sequences one connection through the loop above, handing the
//! connection to websocket/ after a 101 with an upgrade handler.
//! ```
//!
//! # Design Decisions
//! - Parsers are incremental: an incomplete element consumes nothing and is
//!   retried once more bytes arrive
//! - Bodies are pulled lazily from the connection; nothing is buffered
//!   unless the handler asks for it
//! - Header storage is an ordered, case-insensitive multi-map

pub mod body;
pub mod chunked;
pub mod driver;
pub mod error;
pub mod framing;
pub mod headers;
pub mod inbound;
pub mod parser;
pub mod request;
pub mod response;
pub mod server;
pub mod writer;

pub use body::Body;
pub use driver::serve_connection;
pub use error::{Error, Result};
pub use headers::Headers;
pub use inbound::Limits;
pub use parser::{ParseResult, Version};
pub use request::Request;
pub use response::Response;
pub use server::{Handler, HttpServer};
pub use writer::{BoxedWrite, HttpWriter};
