//! Segmented receive buffer over a read half.
//!
//! Every transport read lands in its own [`Bytes`] segment; parsers walk the
//! segments with a [`ByteCursor`] and the buffer releases what they consumed.

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::cursor::ByteCursor;

/// Boxed read half of a connection.
pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

/// Buffered, segment-preserving reader.
pub struct RecvBuffer {
    transport: BoxedRead,
    segments: VecDeque<Bytes>,
    scratch: BytesMut,
    buffered: usize,
    /// Bytes already scanned by a parse attempt that came back incomplete.
    examined: usize,
    read_size: usize,
    eof: bool,
}

impl RecvBuffer {
    pub fn new(transport: BoxedRead, read_size: usize) -> Self {
        Self {
            transport,
            segments: VecDeque::new(),
            scratch: BytesMut::new(),
            buffered: 0,
            examined: 0,
            read_size: read_size.max(1),
            eof: false,
        }
    }

    /// A buffer that is permanently at end-of-stream.
    pub fn closed() -> Self {
        let mut buffer = Self::new(Box::new(tokio::io::empty()), 1);
        buffer.eof = true;
        buffer
    }

    /// Bytes held and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// True once the transport reported end-of-stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Whether bytes arrived since the last incomplete parse attempt.
    pub fn has_unexamined(&self) -> bool {
        self.buffered > self.examined
    }

    /// Record that every buffered byte was scanned without completing a parse.
    pub fn mark_examined(&mut self) {
        self.examined = self.buffered;
    }

    /// Cursor over all buffered bytes.
    pub fn cursor(&mut self) -> ByteCursor<'_> {
        ByteCursor::new(self.segments.make_contiguous())
    }

    /// Pull one more read from the transport.
    ///
    /// Returns `false` at end-of-stream.
    pub async fn fill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }

        self.scratch.reserve(self.read_size);
        let n = self.transport.read_buf(&mut self.scratch).await?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }

        self.segments.push_back(self.scratch.split().freeze());
        self.buffered += n;
        Ok(true)
    }

    /// Fill until at least `n` bytes are buffered; `false` if the stream ends first.
    pub async fn fill_to(&mut self, n: usize) -> io::Result<bool> {
        while self.buffered < n {
            if !self.fill().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Release the first `n` buffered bytes.
    pub fn consume(&mut self, mut n: usize) {
        debug_assert!(n <= self.buffered, "consumed more than buffered");
        n = n.min(self.buffered);
        self.buffered -= n;
        self.examined = 0;

        while n > 0 {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            if front.len() <= n {
                n -= front.len();
                self.segments.pop_front();
            } else {
                front.advance(n);
                n = 0;
            }
        }
    }

    /// Copy buffered bytes into `dst`, reading from the transport if empty.
    ///
    /// Returns 0 only at end-of-stream (or for an empty `dst`).
    pub async fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        if self.buffered == 0 && !self.fill().await? {
            return Ok(0);
        }

        let Some(front) = self.segments.iter().find(|s| !s.is_empty()) else {
            return Ok(0);
        };
        let n = front.len().min(dst.len());
        dst[..n].copy_from_slice(&front[..n]);
        self.consume(n);
        Ok(n)
    }

    /// Copy out and consume exactly `dst.len()` buffered bytes, without
    /// touching the transport. Returns `false`, consuming nothing, if fewer
    /// are buffered.
    pub fn take(&mut self, dst: &mut [u8]) -> bool {
        if dst.len() > self.buffered {
            return false;
        }
        let mut filled = 0;
        for segment in &self.segments {
            if filled == dst.len() {
                break;
            }
            let n = segment.len().min(dst.len() - filled);
            dst[filled..filled + n].copy_from_slice(&segment[..n]);
            filled += n;
        }
        self.consume(dst.len());
        true
    }

    /// Fill `dst` completely; `UnexpectedEof` if the stream ends first.
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < dst.len() {
            let n = self.read(&mut dst[filled..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(())
    }

    /// Discard `n` bytes; `UnexpectedEof` if the stream ends first.
    pub async fn skip(&mut self, mut n: u64) -> io::Result<()> {
        while n > 0 {
            if self.buffered == 0 && !self.fill().await? {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let step = (self.buffered as u64).min(n) as usize;
            self.consume(step);
            n -= step as u64;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecvBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvBuffer")
            .field("segments", &self.segments.len())
            .field("buffered", &self.buffered)
            .field("eof", &self.eof)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, ReadBuf};

    use super::RecvBuffer;

    /// Reader that hands out one predetermined piece per read call.
    pub(crate) struct Pieces {
        parts: VecDeque<Vec<u8>>,
    }

    impl Pieces {
        pub(crate) fn new<I, P>(parts: I) -> Self
        where
            I: IntoIterator<Item = P>,
            P: AsRef<[u8]>,
        {
            Self {
                parts: parts.into_iter().map(|p| p.as_ref().to_vec()).collect(),
            }
        }
    }

    impl AsyncRead for Pieces {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            while let Some(front) = self.parts.front_mut() {
                if front.is_empty() {
                    self.parts.pop_front();
                    continue;
                }
                let n = front.len().min(buf.remaining());
                buf.put_slice(&front[..n]);
                front.drain(..n);
                break;
            }
            Poll::Ready(Ok(()))
        }
    }

    pub(crate) fn buffer_of<I, P>(parts: I) -> RecvBuffer
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        RecvBuffer::new(Box::new(Pieces::new(parts)), 4096)
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::buffer_of;
    use super::*;

    #[tokio::test]
    async fn keeps_each_read_as_a_segment() {
        let mut buffer = buffer_of(["ab", "cd"]);
        assert!(buffer.fill().await.unwrap());
        assert!(buffer.fill().await.unwrap());
        assert_eq!(buffer.buffered(), 4);

        let mut cursor = buffer.cursor();
        let mut seen = Vec::new();
        while let Some(b) = cursor.next() {
            seen.push(b);
        }
        assert_eq!(seen, b"abcd");
    }

    #[tokio::test]
    async fn consume_spans_segments() {
        let mut buffer = buffer_of(["ab", "cd"]);
        buffer.fill_to(4).await.unwrap();
        buffer.consume(3);

        let mut out = [0u8; 4];
        let n = buffer.read(&mut out).await.unwrap();
        assert_eq!(&out[..n], b"d");
        assert_eq!(buffer.read(&mut out).await.unwrap(), 0);
        assert!(buffer.is_eof());
    }

    #[tokio::test]
    async fn read_exact_reports_truncation() {
        let mut buffer = buffer_of(["abc"]);
        let mut out = [0u8; 5];
        let err = buffer.read_exact(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn take_copies_only_what_is_buffered() {
        let mut buffer = buffer_of(["ab", "cde"]);
        buffer.fill_to(5).await.unwrap();

        let mut out = [0u8; 6];
        assert!(!buffer.take(&mut out));
        assert_eq!(buffer.buffered(), 5);

        let mut out = [0u8; 4];
        assert!(buffer.take(&mut out));
        assert_eq!(&out, b"abcd");
        assert_eq!(buffer.buffered(), 1);
    }

    #[tokio::test]
    async fn skip_discards_across_reads() {
        let mut buffer = buffer_of(["abc", "def", "g"]);
        buffer.skip(5).await.unwrap();
        let mut out = [0u8; 8];
        let n = buffer.read(&mut out).await.unwrap();
        assert_eq!(&out[..n], b"f");
    }

    #[tokio::test]
    async fn examined_resets_on_consume() {
        let mut buffer = buffer_of(["abc"]);
        buffer.fill().await.unwrap();
        buffer.mark_examined();
        assert!(!buffer.has_unexamined());
        buffer.consume(1);
        assert!(buffer.has_unexamined());
    }
}
