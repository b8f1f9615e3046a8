//! Response assembly
//!
//! Inbound frame events arrive per stream id. The assembler maps each stream
//! back to the exchange that opened it, accumulates header fields and body
//! bytes, and forwards the finished response (or the error) to the pending
//! exchange table when the stream ends.

use super::error::{Error, Result};
use super::exchange::{ExchangeRef, PendingExchanges};
use super::request::Response;
use super::stream::StreamId;
use crate::http::Headers;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct Accumulator {
    exchange: ExchangeRef,
    headers: Headers,
    body: BytesMut,
    saw_headers: bool,
    saw_data: bool,
}

impl Accumulator {
    fn new(exchange: ExchangeRef) -> Self {
        Accumulator {
            exchange,
            headers: Headers::new(),
            body: BytesMut::new(),
            saw_headers: false,
            saw_data: false,
        }
    }

    fn into_response(self, stream_id: StreamId) -> Result<Response> {
        let status = parse_status(&self.headers)?;
        Ok(Response::new(stream_id, status, self.headers, self.body.freeze()))
    }
}

fn parse_status(headers: &Headers) -> Result<u16> {
    let value = headers
        .get(":status")
        .ok_or_else(|| Error::Protocol("response without :status".to_string()))?;

    match value.parse::<u16>() {
        Ok(status) if (200..=599).contains(&status) => Ok(status),
        _ => Err(Error::Protocol(format!("invalid :status {:?}", value))),
    }
}

fn is_interim(block: &Headers) -> bool {
    block.get(":status").is_some_and(|s| s.starts_with('1'))
}

/// Per-connection response assembler
///
/// Driven from the connection's single event path, so frames of one stream
/// are always seen in order.
#[derive(Debug)]
pub struct ResponseAssembler {
    table: Arc<PendingExchanges>,
    streams: HashMap<StreamId, Accumulator>,
}

impl ResponseAssembler {
    pub fn new(table: Arc<PendingExchanges>) -> Self {
        ResponseAssembler {
            table,
            streams: HashMap::new(),
        }
    }

    /// Associate a freshly opened stream with its exchange
    ///
    /// Returns false, binding nothing, if the exchange was already removed.
    pub fn bind(&mut self, stream_id: StreamId, exchange: ExchangeRef) -> bool {
        if !self.table.attach_stream(&exchange, stream_id) {
            debug!(stream_id, key = %exchange.key(), "stream opened for a removed exchange");
            return false;
        }
        trace!(stream_id, key = %exchange.key(), "stream bound");
        self.streams.insert(stream_id, Accumulator::new(exchange));
        true
    }

    /// Forget a stream whose exchange is gone
    pub fn release(&mut self, stream_id: StreamId) {
        if self.streams.remove(&stream_id).is_some() {
            trace!(stream_id, "stream released");
        }
    }

    /// Check if a stream is bound and not yet finished
    pub fn is_bound(&self, stream_id: StreamId) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Number of streams still being assembled
    pub fn active(&self) -> usize {
        self.streams.len()
    }

    /// Handle one decoded header block
    ///
    /// Blocks seen before the first DATA frame are merged into the response
    /// headers; blocks after it are trailers and are appended.
    pub fn on_headers(&mut self, stream_id: StreamId, block: Headers, end_stream: bool) {
        let Some(acc) = self.streams.get_mut(&stream_id) else {
            warn!(stream_id, "headers for unbound stream, dropping");
            return;
        };

        if !acc.saw_data && !acc.headers.contains(":status") && is_interim(&block) {
            debug!(stream_id, status = block.get(":status"), "interim response discarded");
            if end_stream {
                self.fail(stream_id, Error::Protocol("stream ended on interim response".to_string()));
            }
            return;
        }

        if !acc.saw_headers {
            acc.saw_headers = true;
            self.table.mark_headers(&acc.exchange);
        }
        acc.headers.extend(block);

        if end_stream {
            self.finish(stream_id);
        }
    }

    /// Handle a DATA frame payload
    pub fn on_data(&mut self, stream_id: StreamId, data: Bytes, end_stream: bool) {
        let Some(acc) = self.streams.get_mut(&stream_id) else {
            warn!(stream_id, len = data.len(), "data for unbound stream, dropping");
            return;
        };

        if !acc.saw_headers {
            self.fail(stream_id, Error::Protocol("DATA before response headers".to_string()));
            return;
        }

        acc.saw_data = true;
        acc.body.extend_from_slice(&data);

        if end_stream {
            self.finish(stream_id);
        }
    }

    /// Fail the exchange bound to `stream_id`
    pub fn on_stream_error(&mut self, stream_id: StreamId, error: Error) {
        if !self.streams.contains_key(&stream_id) {
            warn!(stream_id, %error, "error for unbound stream, dropping");
            return;
        }
        self.fail(stream_id, error);
    }

    /// Fail every stream still being assembled
    pub fn fail_all(&mut self, make_error: impl Fn() -> Error) {
        for (stream_id, acc) in self.streams.drain() {
            debug!(stream_id, key = %acc.exchange.key(), "stream abandoned");
            self.table.fail(&acc.exchange, make_error());
        }
    }

    fn finish(&mut self, stream_id: StreamId) {
        let Some(acc) = self.streams.remove(&stream_id) else {
            return;
        };

        let exchange = acc.exchange.clone();
        match acc.into_response(stream_id) {
            Ok(response) => {
                debug!(
                    stream_id,
                    key = %exchange.key(),
                    status = response.status(),
                    body_len = response.body().len(),
                    "response complete"
                );
                self.table.complete(&exchange, response);
            }
            Err(error) => {
                warn!(stream_id, key = %exchange.key(), %error, "malformed response");
                self.table.fail(&exchange, error);
            }
        }
    }

    fn fail(&mut self, stream_id: StreamId, error: Error) {
        if let Some(acc) = self.streams.remove(&stream_id) {
            debug!(stream_id, key = %acc.exchange.key(), %error, "stream failed");
            self.table.fail(&acc.exchange, error);
        }
    }
}
