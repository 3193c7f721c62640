//! Demonstration handlers for the `wharf` binary.
//!
//! Thin users of the public API: plain responses, streaming echo, JSON and
//! a WebSocket chat room.

pub mod handlers;

pub use handlers::{ChatRoom, Demo, DemoKind};
