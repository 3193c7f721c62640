//! WebSocket frame headers and frame writing (RFC 6455 section 5.2).
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! Only headers are parsed here; payloads are streamed by the session so a
//! frame never has to fit in memory.

use std::future::Future;
use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;

use crate::buffer::ByteCursor;
use crate::http::{Body, BoxedWrite};

use super::error::{Error, Result};

/// Largest possible frame header: 2 + 8 extended length + 4 mask key.
pub const MAX_HEADER_LENGTH: usize = 14;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

const FIN: u8 = 0b1000_0000;
const RSV: u8 = 0b0111_0000;
const OPCODE: u8 = 0b0000_1111;
const MASK: u8 = 0b1000_0000;
const LENGTH: u8 = 0b0111_1111;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(Error::InvalidOpcode(other)),
        }
    }

    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub length: u64,
    pub masking_key: [u8; 4],
}

/// Parse a frame header; `None` if more bytes are needed.
///
/// Reserved bits, unknown opcodes and 64-bit lengths with the top bit set
/// are rejected as soon as the byte carrying them is seen.
pub fn parse_frame_info(cursor: &mut ByteCursor<'_>) -> Result<Option<FrameInfo>> {
    let Some(first) = cursor.next() else {
        return Ok(None);
    };
    if first & RSV != 0 {
        return Err(Error::NonZeroReservedBits);
    }
    let fin = first & FIN != 0;
    let opcode = Opcode::from_u8(first & OPCODE)?;

    let Some(second) = cursor.next() else {
        return Ok(None);
    };
    let masked = second & MASK != 0;

    let length = match second & LENGTH {
        126 => {
            let Some(bytes) = next_array::<2>(cursor) else {
                return Ok(None);
            };
            u64::from(u16::from_be_bytes(bytes))
        }
        127 => {
            match cursor.peek() {
                None => return Ok(None),
                Some(b) if b & 0x80 != 0 => return Err(Error::InvalidFrameLength),
                Some(_) => {}
            }
            let Some(bytes) = next_array::<8>(cursor) else {
                return Ok(None);
            };
            u64::from_be_bytes(bytes)
        }
        short => u64::from(short),
    };

    let masking_key = if masked {
        let Some(key) = next_array::<4>(cursor) else {
            return Ok(None);
        };
        key
    } else {
        [0; 4]
    };

    cursor.mark_consumed(0);
    Ok(Some(FrameInfo {
        fin,
        opcode,
        masked,
        length,
        masking_key,
    }))
}

fn next_array<const N: usize>(cursor: &mut ByteCursor<'_>) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    for slot in &mut out {
        *slot = cursor.next()?;
    }
    Some(out)
}

/// Size of an unmasked header announcing `length` payload bytes.
pub const fn header_length(length: u64) -> usize {
    if length <= 125 {
        2
    } else if length <= 0xFFFF {
        4
    } else {
        10
    }
}

/// Append an unmasked (server-to-client) frame header.
pub fn encode_header(fin: bool, opcode: Opcode, length: u64, dst: &mut BytesMut) {
    let first = (if fin { FIN } else { 0 }) | opcode as u8;
    dst.put_u8(first);
    match header_length(length) {
        2 => dst.put_u8(length as u8),
        4 => {
            dst.put_u8(126);
            dst.put_u16(length as u16);
        }
        _ => {
            dst.put_u8(127);
            dst.put_u64(length);
        }
    }
}

/// Split a Close payload into status code and reason.
///
/// The payload is empty, or a two-byte code followed by a UTF-8 reason.
pub fn parse_close_payload(payload: &[u8]) -> Result<(Option<u16>, Option<String>)> {
    match payload {
        [] => Ok((None, None)),
        [_] => Err(Error::InvalidClosePayload),
        [high, low, reason @ ..] => {
            let code = u16::from_be_bytes([*high, *low]);
            if reason.is_empty() {
                return Ok((Some(code), None));
            }
            let reason = std::str::from_utf8(reason).map_err(|_| Error::InvalidClosePayload)?;
            Ok((Some(code), Some(reason.to_string())))
        }
    }
}

/// Build a Close payload; the reason is truncated to fit a control frame.
pub fn encode_close_payload(code: Option<u16>, reason: Option<&str>) -> BytesMut {
    let mut payload = BytesMut::with_capacity(MAX_CONTROL_PAYLOAD);
    if let Some(code) = code {
        payload.put_u16(code);
        if let Some(reason) = reason {
            let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            payload.put_slice(&reason.as_bytes()[..end]);
        }
    }
    payload
}

/// Writes server frames to the transport.
pub struct FrameWriter {
    transport: BoxedWrite,
    header: BytesMut,
}

impl FrameWriter {
    pub fn new(transport: BoxedWrite) -> Self {
        Self {
            transport,
            header: BytesMut::with_capacity(MAX_HEADER_LENGTH),
        }
    }

    /// Write one complete frame and flush it.
    pub async fn write_frame(&mut self, fin: bool, opcode: Opcode, payload: &[u8]) -> io::Result<()> {
        self.header.clear();
        encode_header(fin, opcode, payload.len() as u64, &mut self.header);
        self.transport.write_all(&self.header).await?;
        self.transport.write_all(payload).await?;
        self.transport.flush().await
    }

    /// Write `body` as a single frame of exactly `length` bytes.
    pub async fn write_sized(&mut self, opcode: Opcode, body: &mut Body, length: u64) -> io::Result<()> {
        self.header.clear();
        encode_header(true, opcode, length, &mut self.header);
        self.transport.write_all(&self.header).await?;

        let mut chunk = vec![0u8; length.min(8 * 1024) as usize];
        let mut left = length;
        while left > 0 {
            let want = left.min(chunk.len() as u64) as usize;
            let n = body.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            self.transport.write_all(&chunk[..n]).await?;
            left -= n as u64;
        }
        self.transport.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.transport.shutdown().await
    }
}

/// Destination of the frames of a streamed message.
pub trait FrameSink {
    /// Write one frame.
    fn write_frame(&mut self, fin: bool, opcode: Opcode, payload: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Called between frames; return `false` to abandon the message.
    fn interleave(&mut self) -> impl Future<Output = Result<bool>> + Send;
}

/// Stream a body of unknown length as a fragmented message.
///
/// Frames carry at most `frame_length` payload bytes; the message ends with
/// an empty final frame. Returns `false` if the sink abandoned the message.
pub async fn write_unsized<S: FrameSink>(sink: &mut S, opcode: Opcode, body: &mut Body, frame_length: usize) -> Result<bool> {
    let mut frame = vec![0u8; frame_length.max(1)];
    let mut opcode = opcode;
    loop {
        let n = body.read(&mut frame).await?;
        if n == 0 {
            sink.write_frame(true, opcode, &[]).await?;
            return Ok(true);
        }

        sink.write_frame(false, opcode, &frame[..n]).await?;
        opcode = Opcode::Continuation;
        if !sink.interleave().await? {
            return Ok(false);
        }
    }
}
