//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use wharf::config::ServerConfig;
use wharf::http::{Handler, HttpServer};
use wharf::lifecycle::Shutdown;
use wharf::net::{Listener, ListenerError};

/// Key from RFC 6455 section 1.3 and its accept value.
pub const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const ACCEPT_KEY: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A server running on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), ListenerError>>,
}

impl TestServer {
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }

    /// Trigger shutdown and wait for the accept loop to finish draining.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(IO_TIMEOUT, self.task).await.unwrap().unwrap().unwrap();
    }
}

pub async fn start_server<H: Handler>(handler: H) -> TestServer {
    start_server_with(ServerConfig::default(), handler).await
}

pub async fn start_server_with<H: Handler>(mut config: ServerConfig, handler: H) -> TestServer {
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.shutdown_grace_secs = 2;
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, handler);
    let task = tokio::spawn(server.run(listener, shutdown.signal()));
    TestServer { addr, shutdown, task }
}

/// Write `request`, then read until the server closes the connection.
pub async fn roundtrip(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut out))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

/// Read a response head up to and including the blank line.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = tokio::time::timeout(IO_TIMEOUT, stream.read_u8()).await.unwrap().unwrap();
        head.push(byte);
    }
    String::from_utf8(head).unwrap()
}

pub fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// Read one response whose body is delimited by Content-Length.
pub async fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let head = read_head(stream).await;
    let length: usize = header(&head, "Content-Length").map_or(0, |v| v.parse().unwrap());
    let mut body = vec![0u8; length];
    tokio::time::timeout(IO_TIMEOUT, stream.read_exact(&mut body))
        .await
        .unwrap()
        .unwrap();
    (head, body)
}

/// Decode a chunked body that has been read in full.
pub fn decode_chunked(mut raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let line_end = raw.windows(2).position(|w| w == b"\r\n").unwrap();
        let size_text = std::str::from_utf8(&raw[..line_end]).unwrap();
        let size = usize::from_str_radix(size_text.split(';').next().unwrap(), 16).unwrap();
        raw = &raw[line_end + 2..];
        if size == 0 {
            return out;
        }
        out.extend_from_slice(&raw[..size]);
        assert_eq!(&raw[size..size + 2], b"\r\n");
        raw = &raw[size + 2..];
    }
}

/// A masked client-to-server frame.
pub fn client_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![if fin { 0x80 | opcode } else { opcode }];
    match payload.len() {
        n if n < 126 => frame.push(0x80 | n as u8),
        n if n <= u16::MAX as usize => {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            frame.push(0x80 | 127);
            frame.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }
    frame.extend_from_slice(&MASK);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
    frame
}

/// A Close frame payload.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// One server-to-client frame: `(fin, opcode, payload)`.
pub async fn read_frame(stream: &mut TcpStream) -> (bool, u8, Vec<u8>) {
    tokio::time::timeout(IO_TIMEOUT, async {
        let first = stream.read_u8().await.unwrap();
        let second = stream.read_u8().await.unwrap();
        assert_eq!(second & 0x80, 0, "server frames must not be masked");
        let length = match second & 0x7f {
            126 => stream.read_u16().await.unwrap() as usize,
            127 => stream.read_u64().await.unwrap() as usize,
            n => n as usize,
        };
        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).await.unwrap();
        (first & 0x80 != 0, first & 0x0f, payload)
    })
    .await
    .unwrap()
}

/// Read frames until a complete data message arrives, answering nothing.
pub async fn read_message(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let (mut fin, opcode, mut payload) = read_frame(stream).await;
    while !fin {
        let (next_fin, next_opcode, next) = read_frame(stream).await;
        assert_eq!(next_opcode, 0x0, "expected a continuation frame");
        payload.extend_from_slice(&next);
        fin = next_fin;
    }
    (opcode, payload)
}

/// Connect and complete the opening handshake on `path`.
pub async fn open_websocket(addr: SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {CLIENT_KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
    assert_eq!(header(&head, "Sec-WebSocket-Accept"), Some(ACCEPT_KEY));
    stream
}

/// Read until the server closes the socket, returning what arrived.
pub async fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    // A reset also counts as closed.
    let _ = tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut rest)).await.unwrap();
    rest
}
