//! WebSocket session errors.

use std::io;

use thiserror::Error;

/// Failures of a WebSocket session.
///
/// Every variant except [`Error::Closed`] ends the session abruptly: the
/// connection is dropped without a closing handshake.
#[derive(Debug, Error)]
pub enum Error {
    #[error("reserved frame header bits are set")]
    NonZeroReservedBits,

    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u8),

    #[error("frame length has its most significant bit set")]
    InvalidFrameLength,

    #[error("client frame is not masked")]
    UnmaskedFrame,

    #[error("control frame is fragmented or longer than 125 bytes")]
    InvalidControlFrame,

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    InterleavedDataFrame,

    #[error("Close payload is one byte long or its reason is not UTF-8")]
    InvalidClosePayload,

    #[error("connection ended mid-frame")]
    Truncated,

    #[error("session is closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error tears the session down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Closed)
    }

    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => e,
            Error::Truncated => io::ErrorKind::UnexpectedEof.into(),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
