//! Request-side reading for one connection.
//!
//! # Responsibilities
//! - Drive the incremental parsers against the receive buffer, enforcing
//!   per-element length limits
//! - Track how the current request body is framed and read it on demand
//! - Drain whatever the handler left unread before the next request
//!
//! # Design Decisions
//! - Each request gets a new generation number; a body handle from an
//!   earlier request reads end-of-stream instead of the next request's bytes
//! - The whole inbound side sits behind one async mutex, shared by the
//!   connection driver and the request's body handle

use crate::buffer::{ByteCursor, RecvBuffer};
use crate::config::LimitsConfig;

use super::chunked::ChunkedDecoder;
use super::error::{Error, Result};
use super::headers::Headers;
use super::parser::{parse_header, parse_start_line, ParseResult, StartLine};

/// Length limits applied while parsing.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_start_line_length: usize,
    pub max_header_length: usize,
    pub max_chunk_size_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for Limits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_start_line_length: config.max_start_line_length,
            max_header_length: config.max_header_length,
            max_chunk_size_length: config.max_chunk_size_length,
        }
    }
}

/// Run `parse` against the buffer until it completes, reading more as needed.
///
/// A parse is only retried once new bytes arrive. `Incomplete` is returned
/// when the stream ends first; `too_long` fires when the element spans more
/// than `max_length` bytes, whether or not it has completed.
pub(crate) async fn read_element<T, F>(
    buffer: &mut RecvBuffer,
    max_length: usize,
    too_long: fn(usize) -> Error,
    mut parse: F,
) -> Result<ParseResult<T>>
where
    F: FnMut(&mut ByteCursor<'_>) -> Result<ParseResult<T>>,
{
    loop {
        if buffer.has_unexamined() {
            let mut cursor = buffer.cursor();
            match parse(&mut cursor)? {
                ParseResult::Incomplete => {
                    buffer.mark_examined();
                    if buffer.buffered() > max_length {
                        return Err(too_long(max_length));
                    }
                }
                done => {
                    let used = cursor.position();
                    if used > max_length {
                        return Err(too_long(max_length));
                    }
                    buffer.consume(used);
                    return Ok(done);
                }
            }
        }

        if !buffer.fill().await? {
            return Ok(ParseResult::Incomplete);
        }
    }
}

/// Read header lines into `headers` up to and including the blank line.
pub(crate) async fn read_headers(buffer: &mut RecvBuffer, max_length: usize, headers: &mut Headers) -> Result<()> {
    loop {
        match read_element(buffer, max_length, Error::HeaderTooLong, parse_header).await? {
            ParseResult::Complete(line) => headers.add(line.name, line.value),
            ParseResult::Finished => return Ok(()),
            ParseResult::Incomplete => return Err(Error::ConnectionClosed),
        }
    }
}

/// Request line and headers, before framing is decided.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub start: StartLine,
    pub headers: Headers,
}

/// How the current request's body is delimited.
#[derive(Debug)]
pub enum BodyFraming {
    Empty,
    Sized { remaining: u64 },
    Chunked(ChunkedDecoder),
}

impl BodyFraming {
    /// Remaining length when known up front.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            BodyFraming::Empty => Some(0),
            BodyFraming::Sized { remaining } => Some(*remaining),
            BodyFraming::Chunked(_) => None,
        }
    }
}

/// Read half of a connection plus the framing of the body in flight.
#[derive(Debug)]
pub struct Inbound {
    buffer: RecvBuffer,
    limits: Limits,
    framing: BodyFraming,
    generation: u64,
}

impl Inbound {
    pub fn new(buffer: RecvBuffer, limits: Limits) -> Self {
        Self {
            buffer,
            limits,
            framing: BodyFraming::Empty,
            generation: 0,
        }
    }

    /// Read the next request line and header block.
    ///
    /// `None` when the stream ends before a request line completes.
    pub async fn read_head(&mut self) -> Result<Option<RequestHead>> {
        let parsed = read_element(
            &mut self.buffer,
            self.limits.max_start_line_length,
            Error::StartLineTooLong,
            parse_start_line,
        )
        .await?;

        let ParseResult::Complete(start) = parsed else {
            return Ok(None);
        };

        let mut headers = Headers::new();
        read_headers(&mut self.buffer, self.limits.max_header_length, &mut headers).await?;
        Ok(Some(RequestHead { start, headers }))
    }

    /// Install the framing of a new request body and return its generation.
    pub fn begin_body(&mut self, framing: BodyFraming) -> u64 {
        self.generation += 1;
        self.framing = framing;
        self.generation
    }

    /// Read body bytes of request `generation`; 0 at the end of that body.
    pub async fn read_body(&mut self, generation: u64, dst: &mut [u8]) -> Result<usize> {
        if generation != self.generation || dst.is_empty() {
            return Ok(0);
        }

        match &mut self.framing {
            BodyFraming::Empty => Ok(0),
            BodyFraming::Sized { remaining } => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let want = (dst.len() as u64).min(*remaining) as usize;
                let n = self.buffer.read(&mut dst[..want]).await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
                *remaining -= n as u64;
                Ok(n)
            }
            BodyFraming::Chunked(decoder) => decoder.read(&mut self.buffer, &self.limits, dst).await,
        }
    }

    /// Trailers of request `generation`, once its chunked body was fully read.
    pub fn trailers(&self, generation: u64) -> Option<Headers> {
        if generation != self.generation {
            return None;
        }
        match &self.framing {
            BodyFraming::Chunked(decoder) => decoder.trailers().cloned(),
            _ => None,
        }
    }

    /// Discard the unread rest of the current body.
    pub async fn drain_body(&mut self) -> Result<()> {
        if let BodyFraming::Sized { remaining } = &mut self.framing {
            self.buffer.skip(*remaining).await?;
            *remaining = 0;
        } else if matches!(self.framing, BodyFraming::Chunked(_)) {
            let generation = self.generation;
            let mut scratch = [0u8; 4096];
            while self.read_body(generation, &mut scratch).await? > 0 {}
        }
        Ok(())
    }

    /// Hand the receive buffer over to another protocol.
    ///
    /// The inbound side is left permanently at end-of-stream.
    pub fn take_buffer(&mut self) -> RecvBuffer {
        self.generation += 1;
        self.framing = BodyFraming::Empty;
        std::mem::replace(&mut self.buffer, RecvBuffer::closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::recv::test_util::buffer_of;
    use crate::http::parser::Version;

    fn inbound_of<I, P>(parts: I) -> Inbound
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        Inbound::new(buffer_of(parts), Limits::default())
    }

    #[tokio::test]
    async fn reads_head_split_across_reads() {
        let mut inbound = inbound_of(["GE", "T /a HT", "TP/1.1\r\nHo", "st: x\r\n", "\r\n"]);
        let head = inbound.read_head().await.unwrap().unwrap();
        assert_eq!(head.start.method, "GET");
        assert_eq!(head.start.uri, "/a");
        assert_eq!(head.start.version, Version::Http11);
        assert_eq!(head.headers.get("host").as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn end_of_stream_before_request_is_none() {
        let mut inbound = inbound_of(["GET / HT"]);
        assert!(inbound.read_head().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn end_of_stream_inside_headers_is_an_error() {
        let mut inbound = inbound_of(["GET / HTTP/1.1\r\nHost: x\r\n"]);
        assert!(matches!(inbound.read_head().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn start_line_limit() {
        let mut inbound = Inbound::new(
            buffer_of([format!("GET /{} HTTP/1.1\r\n", "a".repeat(64))]),
            Limits {
                max_start_line_length: 32,
                ..Limits::default()
            },
        );
        assert!(matches!(inbound.read_head().await, Err(Error::StartLineTooLong(32))));
    }

    #[tokio::test]
    async fn header_limit() {
        let mut inbound = Inbound::new(
            buffer_of([format!("GET / HTTP/1.1\r\nX: {}\r\n\r\n", "v".repeat(64))]),
            Limits {
                max_header_length: 16,
                ..Limits::default()
            },
        );
        assert!(matches!(inbound.read_head().await, Err(Error::HeaderTooLong(16))));
    }

    #[tokio::test]
    async fn sized_body_then_next_request() {
        let mut inbound = inbound_of(["POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /next HTTP/1.1\r\n\r\n"]);
        inbound.read_head().await.unwrap().unwrap();
        let generation = inbound.begin_body(BodyFraming::Sized { remaining: 5 });

        let mut out = [0u8; 16];
        let n = inbound.read_body(generation, &mut out).await.unwrap();
        assert_eq!(&out[..n], b"hello");
        assert_eq!(inbound.read_body(generation, &mut out).await.unwrap(), 0);

        let next = inbound.read_head().await.unwrap().unwrap();
        assert_eq!(next.start.uri, "/next");
    }

    #[tokio::test]
    async fn drain_skips_unread_body() {
        let mut inbound = inbound_of(["POST / HTTP/1.1\r\n\r\n", "3\r\nabc\r\n0\r\n\r\n", "GET /b HTTP/1.1\r\n\r\n"]);
        inbound.read_head().await.unwrap().unwrap();
        inbound.begin_body(BodyFraming::Chunked(ChunkedDecoder::new()));
        inbound.drain_body().await.unwrap();
        assert_eq!(inbound.read_head().await.unwrap().unwrap().start.uri, "/b");
    }

    #[tokio::test]
    async fn stale_generation_reads_nothing() {
        let mut inbound = inbound_of(["abcdef"]);
        let old = inbound.begin_body(BodyFraming::Sized { remaining: 3 });
        let current = inbound.begin_body(BodyFraming::Sized { remaining: 3 });

        let mut out = [0u8; 8];
        assert_eq!(inbound.read_body(old, &mut out).await.unwrap(), 0);
        assert_eq!(inbound.read_body(current, &mut out).await.unwrap(), 3);
    }
}
