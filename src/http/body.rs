//! Message bodies.
//!
//! A [`Body`] is a pull-based byte stream with an optional known length.
//! Outgoing bodies are usually in memory; incoming bodies read lazily from
//! the connection, so a handler that never touches the body never buffers it.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use super::headers::Headers;
use super::inbound::Inbound;

/// A lazily read body source living on a connection.
pub(crate) trait Source: Send {
    fn read<'a>(&'a mut self, dst: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>>;

    fn trailers(&mut self) -> BoxFuture<'_, Option<Headers>> {
        Box::pin(async { None })
    }
}

enum Kind {
    Empty,
    Full(Bytes),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    Source(Box<dyn Source>),
}

/// Request, response or WebSocket message payload.
pub struct Body {
    kind: Kind,
    /// Bytes still expected, when the length is known.
    remaining: Option<u64>,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            kind: Kind::Empty,
            remaining: Some(0),
        }
    }

    /// A body of unknown length read from `reader` until it ends.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            kind: Kind::Reader(Box::new(reader)),
            remaining: None,
        }
    }

    /// A reader whose total length is known to be `length`.
    pub fn sized_reader<R>(reader: R, length: u64) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            kind: Kind::Reader(Box::new(reader)),
            remaining: Some(length),
        }
    }

    pub(crate) fn from_source(source: impl Source + 'static, length: Option<u64>) -> Self {
        Self {
            kind: Kind::Source(Box::new(source)),
            remaining: length,
        }
    }

    /// Body of the request currently framed on `inbound`.
    pub(crate) fn incoming(inbound: Arc<Mutex<Inbound>>, generation: u64, length: Option<u64>) -> Self {
        if length == Some(0) {
            return Self::empty();
        }
        Self::from_source(IncomingBody { inbound, generation }, length)
    }

    /// Remaining length, if known.
    pub fn len(&self) -> Option<u64> {
        self.remaining
    }

    /// True when the body is known to have nothing left.
    pub fn is_empty(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Read up to `dst.len()` bytes; 0 at end of body.
    pub async fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() || self.remaining == Some(0) {
            return Ok(0);
        }

        let limit = match self.remaining {
            Some(remaining) => (dst.len() as u64).min(remaining) as usize,
            None => dst.len(),
        };
        let dst = &mut dst[..limit];

        let n = match &mut self.kind {
            Kind::Empty => 0,
            Kind::Full(bytes) => {
                let n = bytes.len().min(dst.len());
                dst[..n].copy_from_slice(&bytes[..n]);
                bytes.advance(n);
                n
            }
            Kind::Reader(reader) => reader.read(dst).await?,
            Kind::Source(source) => source.read(dst).await?,
        };

        if let Some(remaining) = &mut self.remaining {
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "body ended before its declared length",
                ));
            }
            *remaining -= n as u64;
        }
        Ok(n)
    }

    /// Read everything that is left.
    pub async fn to_bytes(&mut self) -> io::Result<Bytes> {
        if let Kind::Full(bytes) = &mut self.kind {
            self.remaining = Some(0);
            return Ok(std::mem::take(bytes));
        }

        let capacity = self.remaining.unwrap_or(0).min(64 * 1024) as usize;
        let mut out = BytesMut::with_capacity(capacity);
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out.freeze());
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read everything that is left as UTF-8 text.
    pub async fn to_text(&mut self) -> io::Result<String> {
        let bytes = self.to_bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Read and discard the rest of the body.
    pub async fn drain(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 8192];
        while self.read(&mut chunk).await? > 0 {}
        Ok(())
    }

    /// Trailer headers of a chunked request body, available once it is fully read.
    pub async fn trailers(&mut self) -> Option<Headers> {
        match &mut self.kind {
            Kind::Source(source) => source.trailers().await,
            _ => None,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Empty => "empty",
            Kind::Full(_) => "full",
            Kind::Reader(_) => "reader",
            Kind::Source(_) => "incoming",
        };
        f.debug_struct("Body")
            .field("kind", &kind)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        let remaining = Some(bytes.len() as u64);
        Self {
            kind: Kind::Full(bytes),
            remaining,
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Bytes::from_static(bytes).into()
    }
}

struct IncomingBody {
    inbound: Arc<Mutex<Inbound>>,
    generation: u64,
}

impl Source for IncomingBody {
    fn read<'a>(&'a mut self, dst: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            let mut inbound = self.inbound.lock().await;
            inbound
                .read_body(self.generation, dst)
                .await
                .map_err(super::error::Error::into_io)
        })
    }

    fn trailers(&mut self) -> BoxFuture<'_, Option<Headers>> {
        Box::pin(async move { self.inbound.lock().await.trailers(self.generation) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::recv::test_util::buffer_of;
    use crate::http::chunked::ChunkedDecoder;
    use crate::http::inbound::{BodyFraming, Limits};

    #[tokio::test]
    async fn full_body_reads_in_pieces() {
        let mut body = Body::from("hello world");
        assert_eq!(body.len(), Some(11));

        let mut out = [0u8; 4];
        assert_eq!(body.read(&mut out).await.unwrap(), 4);
        assert_eq!(&out, b"hell");
        assert_eq!(body.len(), Some(7));
        assert_eq!(&body.to_bytes().await.unwrap()[..], b"o world");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn reader_body_has_unknown_length() {
        let mut body = Body::from_reader(std::io::Cursor::new(b"streamed".to_vec()));
        assert_eq!(body.len(), None);
        assert_eq!(body.to_text().await.unwrap(), "streamed");
    }

    #[tokio::test]
    async fn sized_reader_stops_at_length_and_detects_truncation() {
        let mut body = Body::sized_reader(std::io::Cursor::new(b"abcdef".to_vec()), 4);
        assert_eq!(&body.to_bytes().await.unwrap()[..], b"abcd");

        let mut short = Body::sized_reader(std::io::Cursor::new(b"ab".to_vec()), 4);
        let err = short.to_bytes().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn incoming_chunked_body_exposes_trailers() {
        let mut inbound = Inbound::new(buffer_of(["4\r\nwiki\r\n0\r\nX-Check: ok\r\n\r\n"]), Limits::default());
        let generation = inbound.begin_body(BodyFraming::Chunked(ChunkedDecoder::new()));
        let inbound = Arc::new(Mutex::new(inbound));

        let mut body = Body::incoming(inbound, generation, None);
        assert!(body.trailers().await.is_none());
        assert_eq!(body.to_text().await.unwrap(), "wiki");
        let trailers = body.trailers().await.unwrap();
        assert_eq!(trailers.get("x-check").as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn zero_length_incoming_is_empty() {
        let inbound = Arc::new(Mutex::new(Inbound::new(buffer_of([""]), Limits::default())));
        let body = Body::incoming(inbound, 1, Some(0));
        assert!(body.is_empty());
    }
}
