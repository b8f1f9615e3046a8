//! Reference HTTP/2 connection
//!
//! A `Connection` owns one physical session on a dedicated driver thread.
//! The thread is the only reader and the only writer of the session:
//! requests reach it through a command channel, and every inbound frame is
//! decoded there and handed to a [`FrameHandler`].
//!
//! # Driver loop
//!
//! 1. Reset streams the handler reports as abandoned.
//! 2. Drain queued commands, writing each request's HEADERS (plus
//!    CONTINUATION) and as much DATA as the send windows allow.
//! 3. Poll the session for at most `poll_interval`.
//! 4. Read what is available and dispatch every complete frame. Partial
//!    frames stay buffered for the next round.
//!
//! A stream is reported to the handler with `on_stream_opened` right after
//! its HEADERS were written, so the binding always precedes the response.
//! Request bodies that do not fit the connection or stream send window are
//! queued and sent as WINDOW_UPDATE credit arrives.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::exchange::ExchangeRef;
use super::frames::*;
use super::request::PutRequest;
use super::settings::Settings;
use super::stream::{StreamId, StreamManager};
use super::transport::{FrameHandler, Transport};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID, DEFAULT_INITIAL_WINDOW_SIZE};
use crate::http::{Headers, HttpSession, SessionOps};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Largest flow-control window (RFC 7540 Section 6.9.1)
const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

/// Bytes taken off the session per read
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Connection driver configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// SETTINGS sent in the connection preface
    pub settings: Settings,
    /// How long the driver waits for inbound data before serving commands
    pub poll_interval: Duration,
    /// Session I/O timeout, also the longest a request waits to be handed
    /// to the driver
    pub io_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            settings: Settings {
                enable_push: Some(false),
                ..Settings::new()
            },
            poll_interval: Duration::from_millis(10),
            io_timeout: Duration::from_secs(10),
        }
    }
}

enum Command {
    Open {
        exchange: ExchangeRef,
        request: PutRequest,
        reply: Sender<Result<StreamId>>,
    },
    Shutdown,
}

/// Header block still waiting for CONTINUATION frames
struct PartialBlock {
    stream_id: StreamId,
    block: BytesMut,
    end_stream: bool,
}

/// Rest of a request body waiting for send window
struct PendingBody {
    stream_id: StreamId,
    data: Bytes,
    /// Stream-level send window
    window: i64,
}

/// Connection driver state, owned by the driver thread
pub struct Connection<S: SessionOps, H: FrameHandler> {
    session: HttpSession<S>,
    handler: Arc<H>,
    commands: Receiver<Command>,
    closed: Arc<AtomicBool>,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    streams: StreamManager,
    local: Settings,
    remote: Settings,
    /// Connection-level send window
    send_window: i64,
    bodies: Vec<PendingBody>,
    inbound: BytesMut,
    handshake_done: bool,
    local_settings_acked: bool,
    going_away: bool,
    continuation: Option<PartialBlock>,
    poll_interval: Duration,
}

impl<S, H> Connection<S, H>
where
    S: SessionOps + 'static,
    H: FrameHandler + 'static,
{
    /// Start a connection on an established session
    ///
    /// Writes the client preface and our SETTINGS, then spawns the driver
    /// thread. Application streams are refused until the peer's SETTINGS
    /// have been acknowledged.
    pub fn open(mut session: HttpSession<S>, config: ConnectionConfig, handler: Arc<H>) -> Result<ConnectionHandle> {
        config.settings.validate()?;
        session.set_timeout(Some(config.io_timeout));

        let settings = FrameCodec::encode_settings_frame(&SettingsFrame::new(config.settings.clone()));
        let mut preface = BytesMut::with_capacity(CONNECTION_PREFACE.len() + settings.len());
        preface.put_slice(CONNECTION_PREFACE);
        preface.put_slice(&settings);
        session.write_all(&preface)?;
        debug!("client preface and settings sent");

        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));

        let connection = Connection {
            session,
            handler,
            commands: rx,
            closed: Arc::clone(&closed),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            streams: StreamManager::new(),
            local: config.settings,
            remote: Settings::new(),
            send_window: DEFAULT_INITIAL_WINDOW_SIZE as i64,
            bodies: Vec::new(),
            inbound: BytesMut::with_capacity(READ_CHUNK_SIZE),
            handshake_done: false,
            local_settings_acked: false,
            going_away: false,
            continuation: None,
            poll_interval: config.poll_interval,
        };

        let driver = thread::Builder::new()
            .name("h2mux-driver".to_string())
            .spawn(move || connection.run())?;

        Ok(ConnectionHandle {
            commands: tx,
            shared: Arc::new(Shared {
                closed,
                driver: Mutex::new(Some(driver)),
                io_timeout: config.io_timeout,
            }),
        })
    }

    fn run(mut self) {
        let outcome = self.serve();
        self.shutdown(outcome.err());
    }

    fn serve(&mut self) -> Result<()> {
        loop {
            self.release_abandoned()?;
            if !self.drain_commands()? {
                return Ok(());
            }
            if !self.session.readable(self.poll_interval)? {
                continue;
            }

            self.fill_inbound()?;
            let max_frame_size = self.local.get_max_frame_size() as usize;
            while let Some(frame) = FrameCodec::decode_frame(&mut self.inbound, max_frame_size)? {
                self.dispatch(frame)?;
            }
        }
    }

    fn fill_inbound(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = self.session.read(&mut chunk)?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        self.inbound.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Reset every stream whose exchange was given up
    fn release_abandoned(&mut self) -> Result<()> {
        for stream_id in self.handler.take_abandoned() {
            if self.streams.state(stream_id).is_closed() {
                continue;
            }
            debug!(stream_id, "cancelling abandoned stream");
            self.reset_stream(stream_id, ErrorCode::Cancel)?;
        }
        Ok(())
    }

    fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        self.streams.close(stream_id);
        self.bodies.retain(|body| body.stream_id != stream_id);
        let rst = RstStreamFrame {
            stream_id,
            error_code: code,
        };
        self.send(&FrameCodec::encode_rst_stream_frame(&rst))
    }

    /// Serve queued commands; returns false once the connection should stop
    fn drain_commands(&mut self) -> Result<bool> {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Open { exchange, reply, .. }) if !self.handler.is_pending(&exchange) => {
                    trace!(key = %exchange.key(), exchange_id = exchange.id(), "skipping request of a removed exchange");
                    let _ = reply.send(Err(Error::WriteFailure("exchange no longer pending".to_string())));
                }
                Ok(Command::Open {
                    exchange,
                    request,
                    reply,
                }) => match self.open_stream(exchange, &request) {
                    Err(Error::Http(e)) => {
                        let _ = reply.send(Err(Error::WriteFailure(e.to_string())));
                        return Err(Error::Http(e));
                    }
                    result => {
                        let _ = reply.send(result);
                    }
                },
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => return Ok(false),
                Err(TryRecvError::Empty) => return Ok(true),
            }
        }
    }

    fn open_stream(&mut self, exchange: ExchangeRef, request: &PutRequest) -> Result<StreamId> {
        if !self.handshake_done {
            return Err(Error::WriteFailure("settings handshake not complete".to_string()));
        }
        if self.going_away {
            return Err(Error::WriteFailure("connection is going away".to_string()));
        }

        // Free the slots of timed-out streams before counting against the limit
        self.release_abandoned()?;

        let end_with_headers = request.ends_with_headers();
        let stream_id = self
            .streams
            .open_stream(end_with_headers)
            .map_err(|e| Error::WriteFailure(e.to_string()))?;

        let block = self.encoder.encode(request.headers().as_hpack_pairs());
        let max_frame_size = self.remote.get_max_frame_size() as usize;
        let headers = FrameCodec::encode_header_block(stream_id, Bytes::from(block), end_with_headers, max_frame_size);

        if let Err(e) = self.session.write_all(&headers) {
            self.streams.close(stream_id);
            return Err(e.into());
        }

        debug!(
            stream_id,
            key = %exchange.key(),
            body_len = request.body().len(),
            "request headers written"
        );
        self.handler.on_stream_opened(stream_id, exchange);

        if !end_with_headers {
            self.bodies.push(PendingBody {
                stream_id,
                data: request.body().clone(),
                window: self.remote.get_initial_window_size() as i64,
            });
            self.flush_bodies()?;
        }
        Ok(stream_id)
    }

    /// Write queued request bodies as far as the send windows allow
    fn flush_bodies(&mut self) -> Result<()> {
        let max_frame_size = self.remote.get_max_frame_size() as i64;
        let mut out = BytesMut::new();
        let mut finished = Vec::new();

        for body in &mut self.bodies {
            loop {
                let credit = self.send_window.min(body.window).min(max_frame_size);
                if credit <= 0 || body.data.is_empty() {
                    break;
                }

                let chunk = body.data.split_to((credit as usize).min(body.data.len()));
                let end_stream = body.data.is_empty();
                self.send_window -= chunk.len() as i64;
                body.window -= chunk.len() as i64;
                out.put_slice(&FrameCodec::encode_data_frame(&DataFrame::new(body.stream_id, chunk, end_stream)));
            }

            if body.data.is_empty() {
                finished.push(body.stream_id);
            } else {
                trace!(
                    stream_id = body.stream_id,
                    remaining = body.data.len(),
                    stream_window = body.window,
                    connection_window = self.send_window,
                    "request body waiting for window"
                );
            }
        }

        if out.is_empty() {
            return Ok(());
        }

        self.bodies.retain(|body| !body.data.is_empty());
        for stream_id in finished {
            self.streams.end_local(stream_id);
            trace!(stream_id, "request body complete");
        }
        self.send(&out)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.session.write_all(bytes)?;
        Ok(())
    }

    /// Record the peer's END_STREAM
    ///
    /// A response that ends while our body is still queued makes the rest of
    /// the body useless; the stream is reset instead of waiting for window.
    fn end_remote(&mut self, stream_id: StreamId) -> Result<()> {
        self.streams.end_remote(stream_id);
        if self.bodies.iter().any(|body| body.stream_id == stream_id) {
            debug!(stream_id, "response ended before the request body was sent");
            self.reset_stream(stream_id, ErrorCode::Cancel)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        if let Some(ref partial) = self.continuation {
            if frame.frame_type() != Some(FrameType::Continuation) || frame.stream_id != partial.stream_id {
                return Err(Error::Protocol(format!(
                    "expected CONTINUATION for stream {}",
                    partial.stream_id
                )));
            }
        }

        let Some(frame_type) = frame.frame_type() else {
            trace!(kind = frame.kind, "ignoring frame of unknown type");
            return Ok(());
        };

        trace!(
            %frame_type,
            stream_id = frame.stream_id,
            len = frame.payload_len(),
            flags = frame.flags.as_u8(),
            "frame received"
        );

        match frame_type {
            FrameType::Data => self.recv_data(frame),
            FrameType::Headers => self.recv_headers(frame),
            FrameType::Continuation => self.recv_continuation(frame),
            FrameType::Settings => self.recv_settings(frame),
            FrameType::Ping => self.recv_ping(frame),
            FrameType::Goaway => self.recv_goaway(frame),
            FrameType::RstStream => self.recv_rst_stream(frame),
            FrameType::WindowUpdate => self.recv_window_update(frame),
            FrameType::Priority => Ok(()),
            FrameType::PushPromise => Err(Error::Protocol("PUSH_PROMISE with push disabled".to_string())),
        }
    }

    fn recv_data(&mut self, frame: Frame) -> Result<()> {
        let stream_id = frame.stream_id;
        if stream_id == CONNECTION_STREAM_ID {
            return Err(Error::Protocol("DATA on stream 0".to_string()));
        }

        // Padding counts against flow control too
        let flow_len = frame.payload_len();
        let data = frame.unpadded_payload()?;
        let end_stream = frame.flags.is_end_stream();

        if flow_len > 0 {
            let mut out = BytesMut::new();
            out.put_slice(&FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(
                CONNECTION_STREAM_ID,
                flow_len as u32,
            )));
            if !end_stream && self.streams.state(stream_id).can_receive() {
                out.put_slice(&FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(
                    stream_id,
                    flow_len as u32,
                )));
            }
            self.send(&out)?;
        }

        if end_stream {
            self.end_remote(stream_id)?;
        }
        self.handler.on_data(stream_id, data, end_stream);
        Ok(())
    }

    fn recv_headers(&mut self, frame: Frame) -> Result<()> {
        if frame.stream_id == CONNECTION_STREAM_ID {
            return Err(Error::Protocol("HEADERS on stream 0".to_string()));
        }

        let block = frame.header_block()?;
        let end_stream = frame.flags.is_end_stream();

        if frame.flags.is_end_headers() {
            return self.deliver_header_block(frame.stream_id, &block, end_stream);
        }

        self.continuation = Some(PartialBlock {
            stream_id: frame.stream_id,
            block: BytesMut::from(&block[..]),
            end_stream,
        });
        Ok(())
    }

    fn recv_continuation(&mut self, frame: Frame) -> Result<()> {
        let Some(mut partial) = self.continuation.take() else {
            return Err(Error::Protocol("CONTINUATION without HEADERS".to_string()));
        };

        partial.block.extend_from_slice(&frame.payload);
        if frame.flags.is_end_headers() {
            return self.deliver_header_block(partial.stream_id, &partial.block, partial.end_stream);
        }

        self.continuation = Some(partial);
        Ok(())
    }

    fn deliver_header_block(&mut self, stream_id: StreamId, block: &[u8], end_stream: bool) -> Result<()> {
        // Decode even for unknown streams: the HPACK context is connection wide
        let decoded = self
            .decoder
            .decode(block)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;

        if end_stream {
            self.end_remote(stream_id)?;
        }
        self.handler.on_headers(stream_id, Headers::from_hpack(decoded), end_stream);
        Ok(())
    }

    fn recv_settings(&mut self, frame: Frame) -> Result<()> {
        let settings = SettingsFrame::parse(&frame)?;
        if settings.ack {
            if !self.local_settings_acked {
                self.local_settings_acked = true;
                debug!("peer acknowledged our settings");
            }
            return Ok(());
        }

        self.handler.on_settings_received();
        let previous_window = self.remote.get_initial_window_size() as i64;
        self.remote.merge(&settings.settings);

        // RFC 7540 Section 6.9.2: stream windows follow a new initial size
        let delta = self.remote.get_initial_window_size() as i64 - previous_window;
        if delta != 0 {
            for body in &mut self.bodies {
                body.window += delta;
                if body.window > MAX_WINDOW_SIZE {
                    return Err(Error::FlowControl(format!(
                        "stream {} send window overflow",
                        body.stream_id
                    )));
                }
            }
        }

        self.streams
            .set_max_concurrent_streams(self.remote.get_max_concurrent_streams());
        if self.remote.get_header_table_size() < super::DEFAULT_HEADER_TABLE_SIZE {
            warn!(
                size = self.remote.get_header_table_size(),
                "peer shrank the HPACK table below the encoder's size"
            );
        }
        debug!(
            max_concurrent_streams = ?self.remote.get_max_concurrent_streams(),
            initial_window_size = self.remote.get_initial_window_size(),
            max_frame_size = self.remote.get_max_frame_size(),
            "peer settings applied"
        );

        self.send(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()))?;

        if !self.handshake_done {
            self.handshake_done = true;
            self.handler.on_settings_acknowledged();
        }
        self.flush_bodies()
    }

    fn recv_ping(&mut self, frame: Frame) -> Result<()> {
        let ping = PingFrame::parse(&frame)?;
        if !ping.ack {
            self.send(&FrameCodec::encode_ping_frame(&PingFrame::ack(ping.data)))?;
        }
        Ok(())
    }

    fn recv_goaway(&mut self, frame: Frame) -> Result<()> {
        let goaway = GoawayFrame::parse(&frame)?;
        self.going_away = true;

        if goaway.error_code == ErrorCode::NoError {
            debug!(last_stream_id = goaway.last_stream_id, "peer is going away");
        } else {
            warn!(
                last_stream_id = goaway.last_stream_id,
                code = %goaway.error_code,
                debug_data = %String::from_utf8_lossy(&goaway.debug_data),
                "peer sent GOAWAY"
            );
        }

        for stream_id in self.streams.close_above(goaway.last_stream_id) {
            self.bodies.retain(|body| body.stream_id != stream_id);
            self.handler.on_stream_error(
                stream_id,
                Error::StreamError {
                    stream_id,
                    code: ErrorCode::RefusedStream,
                },
            );
        }
        Ok(())
    }

    fn recv_rst_stream(&mut self, frame: Frame) -> Result<()> {
        let rst = RstStreamFrame::parse(&frame)?;
        debug!(stream_id = rst.stream_id, code = %rst.error_code, "stream reset by peer");

        self.streams.close(rst.stream_id);
        self.bodies.retain(|body| body.stream_id != rst.stream_id);
        self.handler.on_stream_error(
            rst.stream_id,
            Error::StreamError {
                stream_id: rst.stream_id,
                code: rst.error_code,
            },
        );
        Ok(())
    }

    fn recv_window_update(&mut self, frame: Frame) -> Result<()> {
        let update = WindowUpdateFrame::parse(&frame)?;
        let increment = update.size_increment as i64;

        if update.stream_id == CONNECTION_STREAM_ID {
            self.send_window += increment;
            if self.send_window > MAX_WINDOW_SIZE {
                return Err(Error::FlowControl(format!(
                    "connection send window overflow: {}",
                    self.send_window
                )));
            }
        } else {
            // Only streams still sending a body track a window
            let Some(body) = self.bodies.iter_mut().find(|body| body.stream_id == update.stream_id) else {
                return Ok(());
            };
            body.window += increment;
            if body.window > MAX_WINDOW_SIZE {
                let stream_id = update.stream_id;
                warn!(stream_id, "stream send window overflow");
                self.reset_stream(stream_id, ErrorCode::FlowControlError)?;
                self.handler.on_stream_error(
                    stream_id,
                    Error::StreamError {
                        stream_id,
                        code: ErrorCode::FlowControlError,
                    },
                );
                return Ok(());
            }
        }

        self.flush_bodies()
    }

    fn shutdown(&mut self, error: Option<Error>) {
        self.closed.store(true, Ordering::SeqCst);

        match error {
            None => {
                debug!("closing connection");
                let goaway = GoawayFrame::new(0, ErrorCode::NoError, Bytes::new());
                let _ = self.send(&FrameCodec::encode_goaway_frame(&goaway));
            }
            Some(error) => match goaway_code(&error) {
                Some(code) => {
                    warn!(%error, "connection error, sending GOAWAY");
                    let goaway = GoawayFrame::new(0, code, Bytes::from(error.to_string()));
                    let _ = self.send(&FrameCodec::encode_goaway_frame(&goaway));
                }
                None => debug!(%error, "connection lost"),
            },
        }

        if let Err(e) = self.session.close() {
            trace!(error = %e, "session close failed");
        }

        while let Ok(command) = self.commands.try_recv() {
            if let Command::Open { reply, .. } = command {
                let _ = reply.send(Err(Error::WriteFailure("connection closed".to_string())));
            }
        }

        self.handler.on_connection_closed();
    }
}

/// GOAWAY code for an error that ends the connection, if the peer should
/// be told
fn goaway_code(error: &Error) -> Option<ErrorCode> {
    match error {
        Error::Protocol(_) | Error::InvalidSettings(_) => Some(ErrorCode::ProtocolError),
        Error::FrameSize(_) => Some(ErrorCode::FrameSizeError),
        Error::Compression(_) => Some(ErrorCode::CompressionError),
        Error::FlowControl(_) => Some(ErrorCode::FlowControlError),
        _ => None,
    }
}

struct Shared {
    closed: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
    io_timeout: Duration,
}

/// Cloneable handle to a running connection
///
/// Dropping every handle stops the driver as if `close` had been called.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: Sender<Command>,
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Check whether the driver has stopped
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Hand a request to the driver and wait for its stream id
    ///
    /// Returns once the HEADERS are written; the body follows as the send
    /// windows allow. Waits for the driver for at most `timeout`.
    pub fn open_stream(&self, exchange: &ExchangeRef, request: &PutRequest, timeout: Duration) -> Result<StreamId> {
        if self.is_closed() {
            return Err(Error::WriteFailure("connection closed".to_string()));
        }

        let (reply, response) = mpsc::channel();
        self.commands
            .send(Command::Open {
                exchange: exchange.clone(),
                request: request.clone(),
                reply,
            })
            .map_err(|_| Error::WriteFailure("connection closed".to_string()))?;

        match response.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                debug!(key = %exchange.key(), ?timeout, "request not written in time");
                Err(Error::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::WriteFailure("connection closed".to_string())),
        }
    }

    /// Send GOAWAY, close the session and wait for the driver to exit
    pub fn close(&self) -> Result<()> {
        let _ = self.commands.send(Command::Shutdown);

        let driver = self
            .shared
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver
                .join()
                .map_err(|_| Error::Internal("connection driver panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Transport for ConnectionHandle {
    fn write(&self, exchange: &ExchangeRef, request: &PutRequest, timeout: Duration) -> Result<StreamId> {
        self.open_stream(exchange, request, timeout.min(self.shared.io_timeout))
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}
