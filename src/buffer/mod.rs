//! Receive-side buffering shared by the HTTP and WebSocket layers.
//!
//! # Responsibilities
//! - Keep bytes from the transport as discrete segments (no reassembly copies)
//! - Let parsers scan across segment boundaries with a resumable cursor
//! - Release consumed bytes once a parse step completes
//!
//! # Data Flow
//! ```text
//! read half ──▶ RecvBuffer (VecDeque<Bytes>) ──▶ ByteCursor ──▶ parser
//!                     ▲                                            │
//!                     └────────────── consume(n) ◀─────────────────┘
//! ```

pub mod cursor;
pub mod recv;

pub use cursor::{ByteCursor, Slice};
pub use recv::{BoxedRead, RecvBuffer};
