//! HTTP/2 stream bookkeeping
//!
//! This module tracks client-initiated streams as defined in RFC 7540
//! Section 5.1. Only the states a request/response client passes through
//! are modelled: a request either ends with its HEADERS/DATA (half-closed
//! local) or is still sending (open), and the response's END_STREAM or a
//! reset closes it.

use super::error::{Error, Result};
use super::MAX_STREAM_ID;
use std::collections::HashMap;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can receive frames from the peer
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// Client stream manager
///
/// Allocates odd stream ids in increasing order and enforces the peer's
/// SETTINGS_MAX_CONCURRENT_STREAMS.
#[derive(Debug)]
pub struct StreamManager {
    /// Streams that have not yet been closed
    streams: HashMap<StreamId, StreamState>,
    /// Next stream ID (client: odd)
    next_stream_id: StreamId,
    /// Maximum number of concurrent streams (from peer SETTINGS)
    max_concurrent_streams: Option<u32>,
}

impl StreamManager {
    /// Create a new stream manager
    pub fn new() -> Self {
        StreamManager {
            streams: HashMap::new(),
            next_stream_id: 1,
            max_concurrent_streams: None,
        }
    }

    /// Set maximum concurrent streams
    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    /// Get next stream ID (without incrementing)
    pub fn peek_next_stream_id(&self) -> StreamId {
        self.next_stream_id
    }

    /// Allocate the next stream id for a request
    ///
    /// `end_stream` tells whether the request is complete with its HEADERS.
    pub fn open_stream(&mut self, end_stream: bool) -> Result<StreamId> {
        if let Some(max) = self.max_concurrent_streams {
            if self.active_stream_count() >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }

        let stream_id = self.next_stream_id;
        if stream_id > MAX_STREAM_ID {
            return Err(Error::Protocol("stream ids exhausted".to_string()));
        }
        self.next_stream_id += 2;

        let state = if end_stream {
            StreamState::HalfClosedLocal
        } else {
            StreamState::Open
        };
        self.streams.insert(stream_id, state);

        Ok(stream_id)
    }

    /// Get a stream's state; unknown ids are reported as closed
    pub fn state(&self, stream_id: StreamId) -> StreamState {
        self.streams
            .get(&stream_id)
            .copied()
            .unwrap_or(StreamState::Closed)
    }

    /// Record that we sent END_STREAM
    pub fn end_local(&mut self, stream_id: StreamId) {
        self.transition(stream_id, StreamState::HalfClosedLocal);
    }

    /// Record that the peer sent END_STREAM
    pub fn end_remote(&mut self, stream_id: StreamId) {
        self.transition(stream_id, StreamState::HalfClosedRemote);
    }

    fn transition(&mut self, stream_id: StreamId, half_closed: StreamState) {
        let Some(state) = self.streams.get_mut(&stream_id) else {
            return;
        };

        let next = match (*state, half_closed) {
            (StreamState::Open, s) => s,
            (StreamState::HalfClosedLocal, StreamState::HalfClosedRemote)
            | (StreamState::HalfClosedRemote, StreamState::HalfClosedLocal) => StreamState::Closed,
            (s, _) => s,
        };

        if next.is_closed() {
            self.streams.remove(&stream_id);
        } else {
            *state = next;
        }
    }

    /// Close a stream (reset by either side)
    pub fn close(&mut self, stream_id: StreamId) {
        self.streams.remove(&stream_id);
    }

    /// Close every stream above `last_stream_id` and return their ids
    ///
    /// Used when the peer announces GOAWAY: those streams were never
    /// processed and will not be answered.
    pub fn close_above(&mut self, last_stream_id: StreamId) -> Vec<StreamId> {
        let mut refused: Vec<StreamId> = self
            .streams
            .keys()
            .copied()
            .filter(|id| *id > last_stream_id)
            .collect();
        refused.sort_unstable();
        for id in &refused {
            self.streams.remove(id);
        }
        refused
    }

    /// Get number of active streams
    pub fn active_stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Ids of all streams still active
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}
