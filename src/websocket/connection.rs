//! A server-side WebSocket session.
//!
//! # Responsibilities
//! - Receive Text/Binary messages as streams, reassembling fragments
//! - Send messages as one sized frame or as fragments when the length is unknown
//! - Answer Pings, resolve our Pings on matching Pongs, run the closing handshake
//!
//! # Data Flow
//! ```text
//!                  ┌────────────── reader lock ──────────────┐
//! socket ──▶ RecvBuffer ──▶ frame header ──▶ data ──▶ Message body
//!                                  │
//!                                  └──▶ control ──▶ mpsc (bounded) ──▶ control worker
//!                                                                        │
//! send / ping / close ──▶ message lock ──▶ writer lock ◀──────── Pong / Close echo
//! ```
//!
//! # Design Decisions
//! - Control frames are handed to a background worker instead of being
//!   answered inline, so a reader never waits on the writer lock
//! - A fragmented send releases the writer lock between frames, letting
//!   Pongs and Close go out mid-message
//! - State moves Open → Closing → Closed by compare-and-swap; whoever wins
//!   Open → Closing sends the Close frame
//! - Reads may be dropped at any await; a write dropped mid-frame or
//!   mid-message aborts the session, since the peer can no longer parse it

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};

use crate::buffer::RecvBuffer;
use crate::config::WebSocketConfig;
use crate::http::body::Source;
use crate::http::{Body, BoxedWrite};
use crate::lifecycle::ShutdownSignal;

use super::error::{Error, Result};
use super::frame::{
    encode_close_payload, parse_close_payload, parse_frame_info, write_unsized, FrameInfo, FrameSink,
    FrameWriter, Opcode, MAX_CONTROL_PAYLOAD,
};
use super::mask::Masker;
use super::message::{CloseMessage, Message, MessageKind};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

const READ_SIZE: usize = 4096;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Open,
    /// A Close frame was sent or received; the handshake is in progress.
    Closing,
    Closed,
}

struct ControlFrame {
    opcode: Opcode,
    payload: Vec<u8>,
}

/// A frame as handed out by [`FrameReader::next_frame`].
enum Frame {
    /// Header of a data frame; the payload is still on the wire.
    Data(FrameInfo),
    /// A whole control frame, payload unmasked.
    Control(ControlFrame),
}

/// The frame whose payload is currently being streamed.
struct Payload {
    remaining: u64,
    masker: Masker,
    fin: bool,
}

fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Truncated
    } else {
        Error::Io(e)
    }
}

/// Reads frames off the socket.
///
/// Every await point leaves the reader in a resumable state: headers are
/// consumed only together with what they describe, skipped payload is
/// accounted per buffer, and a control frame that could not be queued yet
/// is parked in `pending` until the next call.
struct FrameReader {
    buffer: RecvBuffer,
    current: Option<Payload>,
    generation: u64,
    pending: Option<ControlFrame>,
}

impl FrameReader {
    /// Next frame; `None` at end-of-stream.
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut short_control = false;
        loop {
            if self.buffer.buffered() > 0 {
                let mut cursor = self.buffer.cursor();
                if let Some(info) = parse_frame_info(&mut cursor)? {
                    let header = cursor.position();
                    if !info.masked {
                        return Err(Error::UnmaskedFrame);
                    }
                    if !info.opcode.is_control() {
                        self.buffer.consume(header);
                        return Ok(Some(Frame::Data(info)));
                    }
                    if !info.fin || info.length > MAX_CONTROL_PAYLOAD as u64 {
                        return Err(Error::InvalidControlFrame);
                    }
                    let length = info.length as usize;
                    if self.buffer.buffered() >= header + length {
                        self.buffer.consume(header);
                        let mut payload = vec![0u8; length];
                        self.buffer.take(&mut payload);
                        Masker::new(info.masking_key).apply(&mut payload);
                        return Ok(Some(Frame::Control(ControlFrame {
                            opcode: info.opcode,
                            payload,
                        })));
                    }
                    short_control = true;
                }
            }
            if !self.buffer.fill().await? {
                return if short_control { Err(Error::Truncated) } else { Ok(None) };
            }
        }
    }

    /// Queue a control frame for the worker; `true` if it was a Close.
    async fn route(&mut self, frame: ControlFrame, control: &mpsc::Sender<ControlFrame>) -> bool {
        self.pending = Some(frame);
        self.flush_pending(control).await
    }

    /// Deliver a parked control frame; `true` if it was a Close.
    async fn flush_pending(&mut self, control: &mpsc::Sender<ControlFrame>) -> bool {
        if self.pending.is_none() {
            return false;
        }
        let permit = control.reserve().await;
        let Some(frame) = self.pending.take() else {
            return false;
        };
        let is_close = frame.opcode == Opcode::Close;
        if let Ok(permit) = permit {
            permit.send(frame);
        }
        is_close
    }

    fn start_message(&mut self, info: &FrameInfo) -> u64 {
        self.generation += 1;
        self.current = Some(Payload {
            remaining: info.length,
            masker: Masker::new(info.masking_key),
            fin: info.fin,
        });
        self.generation
    }

    /// Move to the next fragment, routing control frames in between.
    ///
    /// Returns `false` if a Close arrived instead; the message is abandoned.
    async fn next_fragment(&mut self, control: &mpsc::Sender<ControlFrame>) -> Result<bool> {
        loop {
            match self.next_frame().await?.ok_or(Error::Truncated)? {
                Frame::Control(frame) => {
                    if frame.opcode == Opcode::Close {
                        self.current = None;
                    }
                    if self.route(frame, control).await {
                        return Ok(false);
                    }
                }
                Frame::Data(info) if info.opcode != Opcode::Continuation => {
                    return Err(Error::InterleavedDataFrame);
                }
                Frame::Data(info) => {
                    self.current = Some(Payload {
                        remaining: info.length,
                        masker: Masker::new(info.masking_key),
                        fin: info.fin,
                    });
                    return Ok(true);
                }
            }
        }
    }

    /// Unmasked payload bytes of message `generation`; 0 after its final fragment.
    async fn read_payload(&mut self, generation: u64, dst: &mut [u8], control: &mpsc::Sender<ControlFrame>) -> Result<usize> {
        if generation != self.generation || dst.is_empty() {
            return Ok(0);
        }
        if self.flush_pending(control).await {
            return Err(Error::Closed);
        }
        loop {
            let Some(current) = self.current.as_mut() else {
                return Ok(0);
            };
            if current.remaining > 0 {
                let want = (dst.len() as u64).min(current.remaining) as usize;
                let n = self.buffer.read(&mut dst[..want]).await?;
                if n == 0 {
                    return Err(Error::Truncated);
                }
                current.masker.apply(&mut dst[..n]);
                current.remaining -= n as u64;
                return Ok(n);
            }
            if current.fin {
                self.current = None;
                return Ok(0);
            }
            if !self.next_fragment(control).await? {
                return Err(Error::Closed);
            }
        }
    }

    /// Discard the rest of the current frame's payload.
    async fn skip_payload(&mut self) -> Result<()> {
        while let Some(current) = self.current.as_mut().filter(|current| current.remaining > 0) {
            if self.buffer.buffered() == 0 && !self.buffer.fill().await? {
                return Err(Error::Truncated);
            }
            let step = (self.buffer.buffered() as u64).min(current.remaining) as usize;
            self.buffer.consume(step);
            current.remaining -= step as u64;
        }
        Ok(())
    }

    /// Skip whatever is left of the current message.
    ///
    /// Returns `false` if a Close arrived while skipping.
    async fn finish_message(&mut self, control: &mpsc::Sender<ControlFrame>) -> Result<bool> {
        if self.flush_pending(control).await {
            return Ok(false);
        }
        loop {
            self.skip_payload().await?;
            match self.current.as_ref() {
                None => return Ok(true),
                Some(current) if current.fin => {
                    self.current = None;
                    return Ok(true);
                }
                Some(_) => {
                    if !self.next_fragment(control).await? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Drop the current frame without following its fragments.
    async fn abandon_message(&mut self) -> Result<()> {
        self.skip_payload().await?;
        self.current = None;
        self.generation += 1;
        Ok(())
    }
}

struct Shared {
    reader: Mutex<FrameReader>,
    writer: Mutex<FrameWriter>,
    /// Held for the whole of an outgoing message so fragments never interleave.
    message: Mutex<()>,
    control: mpsc::Sender<ControlFrame>,
    pings: DashMap<u32, oneshot::Sender<()>>,
    next_ping: AtomicU32,
    state: AtomicU8,
    close_message: OnceLock<CloseMessage>,
    cancel: ShutdownSignal,
    frame_length: usize,
    remote_addr: Option<SocketAddr>,
}

impl Shared {
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn is_open(&self) -> bool {
        self.state() == OPEN
    }

    /// Open → Closing; `true` if this call won the transition.
    fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn record_close(&self, close: CloseMessage) {
        let _ = self.close_message.set(close);
    }

    fn mark_closed(&self) {
        // Every path to Closed passes through Closing.
        self.begin_close();
        self.state.store(CLOSED, Ordering::Release);
        // Dropping the senders fails every outstanding ping.
        self.pings.clear();
    }

    /// Tear the session down without a closing handshake.
    fn abort(self: &Arc<Self>) {
        self.mark_closed();
        // Dropped futures may run this outside a runtime.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let _ = shared.writer.lock().await.shutdown().await;
        });
    }

    /// Run `operation`, giving up on cancellation and aborting on fatal errors.
    async fn guard<T>(self: &Arc<Self>, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = operation => result,
        };
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::debug!(error = %e, remote = ?self.remote_addr, "WebSocket session aborted");
                self.abort();
            }
        }
        result
    }
}

/// Aborts the session when dropped while armed.
///
/// Held across writes that leave the wire mid-frame or mid-message until
/// they complete.
struct Teardown<'a> {
    shared: &'a Arc<Shared>,
    armed: bool,
}

impl<'a> Teardown<'a> {
    fn arm(shared: &'a Arc<Shared>) -> Self {
        Self { shared, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(remote = ?self.shared.remote_addr, "WebSocket write interrupted");
            self.shared.abort();
        }
    }
}

/// Writes the fragments of one message, holding the writer lock only per frame.
struct SessionSink<'a> {
    shared: &'a Arc<Shared>,
    writer: Option<MutexGuard<'a, FrameWriter>>,
    /// Armed from the first fragment until the final one is out.
    teardown: Option<Teardown<'a>>,
}

impl<'a> SessionSink<'a> {
    fn new(shared: &'a Arc<Shared>) -> Self {
        Self {
            shared,
            writer: None,
            teardown: None,
        }
    }

    fn finish(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown.disarm();
        }
    }
}

impl FrameSink for SessionSink<'_> {
    async fn write_frame(&mut self, fin: bool, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(self.shared.writer.lock().await);
        }
        if !self.shared.is_open() {
            // Whoever closed the session owns the wire now.
            self.finish();
            return Err(Error::Closed);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::Closed);
        };
        if self.teardown.is_none() {
            self.teardown = Some(Teardown::arm(self.shared));
        }
        writer.write_frame(fin, opcode, payload).await?;
        if fin {
            self.finish();
        }
        Ok(())
    }

    async fn interleave(&mut self) -> Result<bool> {
        self.writer = None;
        tokio::task::yield_now().await;
        let open = self.shared.is_open();
        if !open {
            self.finish();
        }
        Ok(open)
    }
}

/// Body source streaming the payload of a received message.
struct MessageBody {
    shared: Arc<Shared>,
    generation: u64,
}

impl Source for MessageBody {
    fn read<'a>(&'a mut self, dst: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            let shared = &self.shared;
            let generation = self.generation;
            shared
                .guard(async {
                    let mut reader = shared.reader.lock().await;
                    reader.read_payload(generation, dst, &shared.control).await
                })
                .await
                .map_err(Error::into_io)
        })
    }
}

async fn run_control(shared: Weak<Shared>, mut frames: mpsc::Receiver<ControlFrame>) {
    while let Some(frame) = frames.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if let Err(e) = handle_control(&shared, frame).await {
            tracing::debug!(error = %e, remote = ?shared.remote_addr, "WebSocket control frame failed");
            shared.abort();
        }
    }
}

async fn handle_control(shared: &Arc<Shared>, frame: ControlFrame) -> Result<()> {
    match frame.opcode {
        Opcode::Ping => {
            let mut writer = shared.writer.lock().await;
            if shared.is_open() {
                writer.write_frame(true, Opcode::Pong, &frame.payload).await?;
            }
        }
        Opcode::Pong => {
            if let Ok(token) = <[u8; 4]>::try_from(frame.payload.as_slice()) {
                if let Some((_, reply)) = shared.pings.remove(&u32::from_be_bytes(token)) {
                    let _ = reply.send(());
                }
            }
        }
        Opcode::Close => {
            let (code, reason) = parse_close_payload(&frame.payload)?;
            let close = CloseMessage { code, reason };
            if shared.begin_close() {
                tracing::debug!(code = ?close.code, remote = ?shared.remote_addr, "WebSocket closed by peer");
                let payload = encode_close_payload(close.code, close.reason.as_deref());
                shared.record_close(close);
                let mut writer = shared.writer.lock().await;
                let echoed = writer.write_frame(true, Opcode::Close, &payload).await;
                let _ = writer.shutdown().await;
                shared.mark_closed();
                echoed?;
            } else {
                // Our own Close is in flight; this is the peer's answer.
                shared.record_close(close);
                shared.mark_closed();
            }
        }
        Opcode::Continuation | Opcode::Text | Opcode::Binary => {}
    }
    Ok(())
}

/// Completes when the peer answers a [`WebSocket::ping`].
///
/// Dropping the handle forgets the Ping; a late Pong is ignored.
#[derive(Debug)]
pub struct PingHandle {
    token: u32,
    reply: oneshot::Receiver<()>,
    cancel: ShutdownSignal,
    session: Weak<Shared>,
}

impl PingHandle {
    /// Wait for the matching Pong.
    ///
    /// Fails with [`Error::Closed`] if the session closes first, or
    /// [`Error::Cancelled`] on shutdown.
    pub async fn wait(mut self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            answered = &mut self.reply => answered.map_err(|_| Error::Closed),
        }
    }
}

impl Drop for PingHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.session.upgrade() {
            shared.pings.remove(&self.token);
        }
    }
}

/// Handle to a WebSocket session; clones share the session.
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
}

impl WebSocket {
    pub(crate) fn new(
        buffer: RecvBuffer,
        transport: BoxedWrite,
        config: &WebSocketConfig,
        cancel: ShutdownSignal,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let (control, frames) = mpsc::channel(config.control_queue_capacity.max(1));
        let shared = Arc::new(Shared {
            reader: Mutex::new(FrameReader {
                buffer,
                current: None,
                generation: 0,
                pending: None,
            }),
            writer: Mutex::new(FrameWriter::new(transport)),
            message: Mutex::new(()),
            control,
            pings: DashMap::new(),
            next_ping: AtomicU32::new(0),
            state: AtomicU8::new(OPEN),
            close_message: OnceLock::new(),
            cancel,
            frame_length: config.max_frame_length.max(1),
            remote_addr,
        });
        tokio::spawn(run_control(Arc::downgrade(&shared), frames));
        Self { shared }
    }

    /// Run a session over an already-upgraded stream.
    pub fn from_stream<S>(stream: S, config: &WebSocketConfig, cancel: ShutdownSignal) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self::new(RecvBuffer::new(Box::new(read), READ_SIZE), Box::new(write), config, cancel, None)
    }

    pub fn state(&self) -> State {
        match self.shared.state() {
            OPEN => State::Open,
            CLOSING => State::Closing,
            _ => State::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state() == CLOSED
    }

    /// How the session was closed; `None` until it is fully closed.
    pub fn close_message(&self) -> Option<CloseMessage> {
        if !self.is_closed() {
            return None;
        }
        Some(self.shared.close_message.get().cloned().unwrap_or_default())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.is_open() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Receive the next Text or Binary message.
    ///
    /// Any unread part of the previous message is skipped first. Returns
    /// `None` when the peer closes or the stream ends.
    pub async fn receive(&self) -> Result<Option<Message>> {
        self.ensure_open()?;
        let shared = &self.shared;
        shared
            .guard(async {
                let mut reader = shared.reader.lock().await;
                if !reader.finish_message(&shared.control).await? {
                    return Ok(None);
                }

                loop {
                    let info = match reader.next_frame().await? {
                        None => {
                            shared.mark_closed();
                            return Ok(None);
                        }
                        Some(Frame::Control(frame)) => {
                            if reader.route(frame, &shared.control).await {
                                return Ok(None);
                            }
                            continue;
                        }
                        Some(Frame::Data(info)) => info,
                    };

                    let kind = match info.opcode {
                        Opcode::Text => MessageKind::Text,
                        Opcode::Binary => MessageKind::Binary,
                        _ => return Err(Error::UnexpectedContinuation),
                    };

                    let length = info.fin.then_some(info.length);
                    let generation = reader.start_message(&info);
                    let body = Body::from_source(
                        MessageBody {
                            shared: Arc::clone(shared),
                            generation,
                        },
                        length,
                    );
                    return Ok(Some(Message::new(kind, body)));
                }
            })
            .await
    }

    /// Send a message.
    ///
    /// Bodies of known length go out as one frame; others are fragmented.
    /// Concurrent sends are serialized, never interleaved.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.ensure_open()?;
        let shared = &self.shared;
        let opcode = message.kind().opcode();
        let mut body = message.into_body();
        shared
            .guard(async {
                let _message = shared.message.lock().await;
                match body.len() {
                    Some(length) => {
                        let mut writer = shared.writer.lock().await;
                        if !shared.is_open() {
                            return Err(Error::Closed);
                        }
                        let teardown = Teardown::arm(shared);
                        writer.write_sized(opcode, &mut body, length).await?;
                        teardown.disarm();
                    }
                    None => {
                        let mut sink = SessionSink::new(shared);
                        if !write_unsized(&mut sink, opcode, &mut body, shared.frame_length).await? {
                            return Err(Error::Closed);
                        }
                    }
                }
                Ok(())
            })
            .await
    }

    /// Send a Ping; the returned handle completes on the matching Pong.
    pub async fn ping(&self) -> Result<PingHandle> {
        self.ensure_open()?;
        let shared = &self.shared;
        let token = shared.next_ping.fetch_add(1, Ordering::Relaxed);
        let (reply, answered) = oneshot::channel();
        shared.pings.insert(token, reply);
        // Removes the token again if the write fails or is dropped.
        let handle = PingHandle {
            token,
            reply: answered,
            cancel: shared.cancel.clone(),
            session: Arc::downgrade(shared),
        };

        shared
            .guard(async {
                let mut writer = shared.writer.lock().await;
                if !shared.is_open() {
                    return Err(Error::Closed);
                }
                let teardown = Teardown::arm(shared);
                writer.write_frame(true, Opcode::Ping, &token.to_be_bytes()).await?;
                teardown.disarm();
                Ok(())
            })
            .await?;
        Ok(handle)
    }

    /// Run the closing handshake.
    ///
    /// Sends Close, then waits for the peer's Close while discarding any
    /// other frames. A second call while closing is a no-op; calling after
    /// the session closed fails with [`Error::Closed`].
    pub async fn close(&self, close: CloseMessage) -> Result<()> {
        let shared = &self.shared;
        if shared.state() == CLOSED {
            return Err(Error::Closed);
        }
        if !shared.begin_close() {
            return Ok(());
        }
        let teardown = Teardown::arm(shared);

        let result = shared
            .guard(async {
                {
                    let payload = encode_close_payload(close.code, close.reason.as_deref());
                    let mut writer = shared.writer.lock().await;
                    writer.write_frame(true, Opcode::Close, &payload).await?;
                }

                let mut reader = shared.reader.lock().await;
                let mut answer = reader.pending.take().filter(|frame| frame.opcode == Opcode::Close);
                reader.abandon_message().await?;
                while answer.is_none() && shared.state() != CLOSED {
                    match reader.next_frame().await? {
                        None => break,
                        Some(Frame::Control(frame)) if frame.opcode == Opcode::Close => answer = Some(frame),
                        Some(Frame::Control(_)) => {}
                        Some(Frame::Data(info)) => reader.buffer.skip(info.length).await.map_err(truncated)?,
                    }
                }
                if let Some(frame) = answer {
                    let (code, reason) = parse_close_payload(&frame.payload)?;
                    shared.record_close(CloseMessage { code, reason });
                }
                Ok(())
            })
            .await;
        teardown.disarm();

        shared.mark_closed();
        let _ = shared.writer.lock().await.shutdown().await;
        tracing::debug!(remote = ?shared.remote_addr, "WebSocket closed");
        result
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("state", &self.state())
            .field("remote_addr", &self.shared.remote_addr)
            .finish()
    }
}
