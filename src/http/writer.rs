//! Response serialization.
//!
//! The status line and headers are staged in a buffer and written with a
//! single flush; the body is then copied straight to the transport.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::body::Body;
use super::chunked::{encode_chunk, encode_last_chunk};
use super::framing::BodyMode;
use super::headers::Headers;

/// Boxed write half of a connection.
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Writes HTTP/1.1 responses to a transport.
pub struct HttpWriter {
    transport: BoxedWrite,
    buf: BytesMut,
}

impl HttpWriter {
    pub fn new(transport: BoxedWrite) -> Self {
        Self {
            transport,
            buf: BytesMut::with_capacity(1024),
        }
    }

    /// Stage `HTTP/1.1 <status> <reason>\r\n`.
    pub fn write_status_line(&mut self, status: u16, reason: &str) {
        let mut digits = [0u8; 5];
        let digits = format_decimal(status, &mut digits);
        self.buf.reserve(9 + digits.len() + 1 + reason.len() + 2);
        self.buf.put_slice(b"HTTP/1.1 ");
        self.buf.put_slice(digits);
        self.buf.put_u8(b' ');
        put_latin1(&mut self.buf, reason);
        self.buf.put_slice(b"\r\n");
    }

    /// Stage `name: value\r\n`.
    pub fn write_header(&mut self, name: &str, value: &str) {
        self.buf.reserve(name.len() + 2 + value.len() + 2);
        put_latin1(&mut self.buf, name);
        self.buf.put_slice(b": ");
        put_latin1(&mut self.buf, value);
        self.buf.put_slice(b"\r\n");
    }

    /// Stage every header, joining repeated values.
    pub fn write_headers(&mut self, headers: &Headers) {
        for (name, values) in headers.iter() {
            self.write_header(name, &values.join(", "));
        }
    }

    /// End the header block, flush it, then stream `body` as `mode` says.
    pub async fn send(&mut self, body: &mut Body, mode: BodyMode) -> io::Result<()> {
        self.buf.put_slice(b"\r\n");
        self.flush_staged().await?;

        match mode {
            BodyMode::Omit => {}
            BodyMode::Raw => {
                let mut chunk = vec![0u8; COPY_BUFFER_SIZE];
                loop {
                    let n = body.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    self.transport.write_all(&chunk[..n]).await?;
                }
            }
            BodyMode::Chunked => {
                let mut chunk = vec![0u8; COPY_BUFFER_SIZE];
                loop {
                    let n = body.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    encode_chunk(&chunk[..n], &mut self.buf);
                    self.flush_staged().await?;
                }
                encode_last_chunk(&Headers::new(), &mut self.buf);
                self.flush_staged().await?;
            }
        }

        self.transport.flush().await
    }

    /// Write a bodiless response that closes the connection.
    pub async fn send_error(&mut self, status: u16, reason: &str) -> io::Result<()> {
        self.write_status_line(status, reason);
        self.write_header("Content-Length", "0");
        self.write_header("Connection", "close");
        self.send(&mut Body::empty(), BodyMode::Omit).await
    }

    async fn flush_staged(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.transport.write_all(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Give back the transport, e.g. after a protocol switch.
    pub fn into_inner(self) -> BoxedWrite {
        self.transport
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.transport.shutdown().await
    }
}

/// Header text is ISO-8859-1; characters outside it become `?`.
fn put_latin1(buf: &mut BytesMut, text: &str) {
    if text.is_ascii() {
        buf.put_slice(text.as_bytes());
        return;
    }
    for c in text.chars() {
        buf.put_u8(u8::try_from(u32::from(c)).unwrap_or(b'?'));
    }
}

fn format_decimal(mut value: u16, out: &mut [u8; 5]) -> &[u8] {
    let mut start = out.len();
    loop {
        start -= 1;
        out[start] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    &out[start..]
}
