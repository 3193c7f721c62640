//! Errors raised while framing an HTTP/1.x exchange.

use std::io;

use thiserror::Error;

/// Protocol and transport failures of a single connection.
///
/// Variants that describe a malformed request map to a status code via
/// [`Error::status`]; the connection is answered with that status and closed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("carriage return not followed by a line feed")]
    InvalidNewline,

    #[error("invalid character in request method")]
    InvalidToken,

    #[error("invalid character in request target")]
    InvalidUri,

    #[error("malformed protocol version")]
    InvalidVersion,

    #[error("unsupported protocol version")]
    UnsupportedVersion,

    #[error("invalid character in header name")]
    InvalidHeaderName,

    #[error("invalid character in header value")]
    InvalidHeaderValue,

    #[error("invalid hexadecimal chunk size")]
    InvalidHexNumber,

    #[error("invalid character in chunk extension")]
    InvalidChunkExtension,

    #[error("chunk size line longer than {0} bytes")]
    ChunkSizeTooLong(usize),

    #[error("header line longer than {0} bytes")]
    HeaderTooLong(usize),

    #[error("start line longer than {0} bytes")]
    StartLineTooLong(usize),

    #[error("missing or repeated Host header")]
    InvalidHost,

    #[error("both Transfer-Encoding and Content-Length are present")]
    TransferEncodingWithContentLength,

    #[error("invalid Content-Length")]
    InvalidContentLength,

    #[error("request body length cannot be determined")]
    UnknownBodyLength,

    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),

    #[error("connection closed mid-message")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias for HTTP operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Status line to answer with before closing, if this error is the client's fault.
    pub fn status(&self) -> Option<(u16, &'static str)> {
        match self {
            Error::InvalidNewline
            | Error::InvalidToken
            | Error::InvalidUri
            | Error::InvalidVersion
            | Error::InvalidHeaderName
            | Error::InvalidHeaderValue
            | Error::InvalidHexNumber
            | Error::InvalidChunkExtension
            | Error::ChunkSizeTooLong(_)
            | Error::InvalidHost
            | Error::TransferEncodingWithContentLength
            | Error::InvalidContentLength
            | Error::UnknownBodyLength => Some((400, "Bad Request")),
            Error::StartLineTooLong(_) => Some((414, "URI Too Long")),
            Error::HeaderTooLong(_) | Error::UnsupportedVersion => Some((501, "Not Implemented")),
            Error::InvalidResponse(_) | Error::ConnectionClosed | Error::Io(_) => None,
        }
    }

    /// Wrap as an I/O error for body readers.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => e,
            Error::ConnectionClosed => io::ErrorKind::UnexpectedEof.into(),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
