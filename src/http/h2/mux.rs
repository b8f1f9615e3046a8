//! Per-connection multiplexing state
//!
//! `Multiplexer` ties the settings gate, the pending exchange table and the
//! response assembler of one connection together and receives the frame
//! events of that connection.

use super::assembler::ResponseAssembler;
use super::error::Error;
use super::exchange::{ExchangeRef, PendingExchanges};
use super::gate::SettingsGate;
use super::stream::StreamId;
use super::transport::FrameHandler;
use crate::http::Headers;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared state of one multiplexed connection
#[derive(Debug)]
pub struct Multiplexer {
    gate: SettingsGate,
    exchanges: Arc<PendingExchanges>,
    assembler: Mutex<ResponseAssembler>,
}

impl Multiplexer {
    pub fn new() -> Self {
        let exchanges = Arc::new(PendingExchanges::new());
        Multiplexer {
            gate: SettingsGate::new(),
            assembler: Mutex::new(ResponseAssembler::new(Arc::clone(&exchanges))),
            exchanges,
        }
    }

    pub fn gate(&self) -> &SettingsGate {
        &self.gate
    }

    pub fn exchanges(&self) -> &Arc<PendingExchanges> {
        &self.exchanges
    }

    fn assembler(&self) -> MutexGuard<'_, ResponseAssembler> {
        self.assembler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHandler for Multiplexer {
    fn on_settings_received(&self) {
        self.gate.mark_received();
    }

    fn on_settings_acknowledged(&self) {
        self.gate.signal();
    }

    fn is_pending(&self, exchange: &ExchangeRef) -> bool {
        self.exchanges.is_live(exchange)
    }

    fn on_stream_opened(&self, stream_id: StreamId, exchange: ExchangeRef) {
        if !self.assembler().bind(stream_id, exchange) {
            self.exchanges.abandon(stream_id);
        }
    }

    fn take_abandoned(&self) -> Vec<StreamId> {
        let abandoned = self.exchanges.take_abandoned();
        if !abandoned.is_empty() {
            let mut assembler = self.assembler();
            for stream_id in &abandoned {
                assembler.release(*stream_id);
            }
        }
        abandoned
    }

    fn on_headers(&self, stream_id: StreamId, headers: Headers, end_stream: bool) {
        self.assembler().on_headers(stream_id, headers, end_stream);
    }

    fn on_data(&self, stream_id: StreamId, data: Bytes, end_stream: bool) {
        self.assembler().on_data(stream_id, data, end_stream);
    }

    fn on_stream_error(&self, stream_id: StreamId, error: Error) {
        self.assembler().on_stream_error(stream_id, error);
    }

    fn on_connection_closed(&self) {
        self.gate.close();
        self.assembler().fail_all(|| Error::ConnectionClosed);
        let failed = self.exchanges.fail_all(|| Error::ConnectionClosed);
        if failed > 0 {
            tracing::debug!(failed, "unbound exchanges failed on connection close");
        }
    }
}
