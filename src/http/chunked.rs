//! Chunked transfer coding.
//!
//! # Data Flow
//! ```text
//! [CRLF] size-hex [; ext[=val]]* CRLF   ──▶ parse_chunk_size
//! <size bytes>                          ──▶ ChunkedDecoder::read (raw copy)
//! ... repeat until size 0 ...
//! trailer-line* CRLF                    ──▶ parse_header, kept as trailers
//! ```
//! The CRLF closing a chunk's data is consumed as the prefix of the next
//! size line, so data is never scanned, only copied.

use bytes::{BufMut, BytesMut};

use crate::buffer::{ByteCursor, RecvBuffer};

use super::error::{Error, Result};
use super::headers::Headers;
use super::inbound::{read_element, read_headers, Limits};
use super::parser::{consume_newline, is_tchar, ParseResult};

/// Parse a chunk-size line, optionally preceded by the CRLF ending the previous chunk.
///
/// Extensions are validated and discarded.
pub fn parse_chunk_size(cursor: &mut ByteCursor<'_>, prefix_newline: bool) -> Result<ParseResult<u64>> {
    if prefix_newline && !consume_newline(cursor)? {
        return Ok(ParseResult::Incomplete);
    }

    let mut size = None;
    loop {
        match cursor.peek() {
            None => return Ok(ParseResult::Incomplete),
            Some(b'\r' | b'\n') => {
                if size.is_none() {
                    size = Some(parse_hex(cursor)?);
                }
                break;
            }
            Some(b';') => {
                if size.is_none() {
                    size = Some(parse_hex(cursor)?);
                }
                cursor.bump();
            }
            Some(b) if size.is_none() && !b.is_ascii_hexdigit() => {
                return Err(Error::InvalidHexNumber)
            }
            Some(b) if size.is_some() && b != b'=' && !is_tchar(b) => {
                return Err(Error::InvalidChunkExtension)
            }
            Some(_) => cursor.bump(),
        }
    }

    if !consume_newline(cursor)? {
        return Ok(ParseResult::Incomplete);
    }
    Ok(ParseResult::Complete(size.unwrap_or_default()))
}

fn parse_hex(cursor: &mut ByteCursor<'_>) -> Result<u64> {
    let digits = cursor.take(0);
    if digits.is_empty() {
        return Err(Error::InvalidHexNumber);
    }

    let mut value: u64 = 0;
    for chunk in digits.chunks() {
        for &b in chunk {
            let digit = (b as char).to_digit(16).ok_or(Error::InvalidHexNumber)?;
            value = value
                .checked_mul(16)
                .and_then(|v| v.checked_add(u64::from(digit)))
                .ok_or(Error::InvalidHexNumber)?;
        }
    }
    Ok(value)
}

/// Incremental decoder state for one chunked body.
#[derive(Debug, Default)]
pub struct ChunkedDecoder {
    /// Bytes left in the current chunk.
    remaining: u64,
    started: bool,
    finished: bool,
    trailers: Headers,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Trailer headers, populated once the terminal chunk has been read.
    pub fn trailers(&self) -> Option<&Headers> {
        self.finished.then_some(&self.trailers)
    }

    /// Read decoded body bytes into `dst`; 0 after the terminal chunk.
    pub async fn read(&mut self, buffer: &mut RecvBuffer, limits: &Limits, dst: &mut [u8]) -> Result<usize> {
        if self.finished || dst.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            let prefix = self.started;
            let parsed = read_element(
                buffer,
                limits.max_chunk_size_length,
                Error::ChunkSizeTooLong,
                |cursor| parse_chunk_size(cursor, prefix),
            )
            .await?;

            let ParseResult::Complete(size) = parsed else {
                return Err(Error::ConnectionClosed);
            };
            self.started = true;
            self.remaining = size;

            if size == 0 {
                read_headers(buffer, limits.max_header_length, &mut self.trailers).await?;
                self.finished = true;
                return Ok(0);
            }
        }

        let want = (dst.len() as u64).min(self.remaining) as usize;
        let n = buffer.read(&mut dst[..want]).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Append one chunk (size line, data, CRLF) to `dst`.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    dst.reserve(data.len() + 20);
    dst.put_slice(format!("{:X}\r\n", data.len()).as_bytes());
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

/// Append the terminal chunk, optional trailers, and the closing blank line.
pub fn encode_last_chunk(trailers: &Headers, dst: &mut BytesMut) {
    dst.put_slice(b"0\r\n");
    for (name, values) in trailers.iter() {
        dst.put_slice(name.as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(values.join(", ").as_bytes());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}
