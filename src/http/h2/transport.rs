//! Seams between the multiplexing core and the connection
//!
//! The core never touches a socket. It hands requests to a [`Transport`] and
//! is driven by frame events through a [`FrameHandler`]. The reference
//! implementation of both sides lives in `connection`; tests substitute
//! their own transports.

use super::error::{Error, Result};
use super::exchange::ExchangeRef;
use super::request::PutRequest;
use super::stream::StreamId;
use crate::http::Headers;
use bytes::Bytes;
use std::time::Duration;

/// Outbound side: opens a stream for a request and writes it
pub trait Transport: Send + Sync {
    /// Write `request` on a new stream and return its id
    ///
    /// Blocks for at most `timeout`. Implementations must report the new
    /// stream through [`FrameHandler::on_stream_opened`] before dispatching
    /// any inbound frame of that stream.
    fn write(&self, exchange: &ExchangeRef, request: &PutRequest, timeout: Duration) -> Result<StreamId>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn write(&self, exchange: &ExchangeRef, request: &PutRequest, timeout: Duration) -> Result<StreamId> {
        (**self).write(exchange, request, timeout)
    }
}

/// Inbound side: frame events of one connection
///
/// Calls are made from the connection's single event path.
pub trait FrameHandler: Send + Sync {
    /// Peer's SETTINGS frame received, before our ACK is written
    fn on_settings_received(&self);

    /// Our ACK of the peer's SETTINGS has been written
    fn on_settings_acknowledged(&self);

    /// Check if `exchange` still waits for its request to be written
    fn is_pending(&self, exchange: &ExchangeRef) -> bool;

    /// A request stream was opened for `exchange`
    fn on_stream_opened(&self, stream_id: StreamId, exchange: ExchangeRef);

    /// Streams nobody waits for any more
    ///
    /// The handler has already dropped its state for them; the transport
    /// resets each one that is still open.
    fn take_abandoned(&self) -> Vec<StreamId>;

    /// A complete, decoded header block
    fn on_headers(&self, stream_id: StreamId, headers: Headers, end_stream: bool);

    /// DATA payload with padding removed
    fn on_data(&self, stream_id: StreamId, data: Bytes, end_stream: bool);

    /// The stream was reset or refused
    fn on_stream_error(&self, stream_id: StreamId, error: Error);

    /// The connection is gone; no further events follow
    fn on_connection_closed(&self);
}
