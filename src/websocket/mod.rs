//! WebSocket (RFC 6455) subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP Upgrade request
//!     → handshake.rs (validate, Sec-WebSocket-Accept, 101 + session handler)
//!     → [driver flushes the 101 and hands over the connection]
//!     → connection.rs (WebSocket session)
//!         receive: frame.rs (header) → mask.rs (unmask) → message.rs
//!         send:    message.rs → frame.rs (sized or fragmented)
//!         control: Ping → Pong, Pong → ping resolved, Close → echo + Closed
//! ```
//!
//! # Design Decisions
//! - Server side only: inbound frames must be masked, outbound never are
//! - Messages stream; a large payload is never buffered by the session

pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod message;

pub use connection::{PingHandle, State, WebSocket};
pub use error::{Error, Result};
pub use frame::Opcode;
pub use handshake::{accept, compute_accept_key, upgrade, HandshakeError};
pub use message::{CloseMessage, Message, MessageKind};
