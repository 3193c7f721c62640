//! The byte stream a connection runs over.
//!
//! Plain TCP and TLS streams look the same to the protocol layers: a
//! segmented receive buffer on the read half and a boxed write half.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::buffer::RecvBuffer;
use crate::http::BoxedWrite;

/// Any duplex stream a connection can be served over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed transport, letting TCP and TLS connections share one code path.
pub type BoxedTransport = Box<dyn Transport>;

/// Split `stream` into a receive buffer reading `read_size` bytes at a time
/// and a write half.
pub fn split<T: Transport>(stream: T, read_size: usize) -> (RecvBuffer, BoxedWrite) {
    let (read, write) = tokio::io::split(stream);
    (RecvBuffer::new(Box::new(read), read_size), Box::new(write))
}
