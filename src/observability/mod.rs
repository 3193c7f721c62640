//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with key/value fields (connection_id, peer_addr, status)
//!
//! logging.rs installs:
//!     → EnvFilter (RUST_LOG, else configured level)
//!     → fmt layer (pretty) or JSON layer
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection ID flows through every event of a connection

pub mod logging;
