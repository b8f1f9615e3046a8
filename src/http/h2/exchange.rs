//! Pending exchange table
//!
//! The table maps correlation keys to in-flight exchanges. Callers register
//! an exchange before the request is written and block on the returned
//! handle; the connection's event path completes or fails the exchange when
//! the response (or an error) arrives.
//!
//! Every record carries a table-unique exchange id. Completion and failure
//! address a record by `(key, id)`, so a response that arrives after its
//! exchange timed out can never be delivered to a newer exchange that reuses
//! the same key.
//!
//! A record removed before its response completed (timeout, failure or a
//! dropped handle) leaves its stream behind. Such stream ids are queued and
//! the connection collects them with `take_abandoned` to reset the stream and
//! release its slot.

use super::correlation::CorrelationKey;
use super::error::{Error, Result};
use super::request::{RequestSummary, Response};
use super::stream::StreamId;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Table-unique exchange identifier
pub type ExchangeId = u64;

/// Reference to one registered exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExchangeRef {
    key: CorrelationKey,
    id: ExchangeId,
}

impl ExchangeRef {
    /// Correlation key of the exchange
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Exchange id assigned at registration
    pub fn id(&self) -> ExchangeId {
        self.id
    }
}

/// Lifecycle of an exchange
///
/// Transitions only move forward: `Pending → HeadersReceived → Complete`,
/// or `Pending/HeadersReceived → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    /// Registered, no response yet
    Pending,
    /// Response headers seen, body in progress
    HeadersReceived,
    /// Response fully received
    Complete,
    /// Ended with an error
    Failed,
}

impl ExchangeStatus {
    /// Check if the exchange has a result
    pub fn is_settled(&self) -> bool {
        matches!(self, ExchangeStatus::Complete | ExchangeStatus::Failed)
    }

    /// Check if moving to `next` is a forward transition
    pub fn can_advance_to(&self, next: ExchangeStatus) -> bool {
        use ExchangeStatus::*;
        matches!(
            (self, next),
            (Pending, HeadersReceived)
                | (HeadersReceived, Complete)
                | (Pending, Failed)
                | (HeadersReceived, Failed)
        )
    }
}

#[derive(Debug)]
struct ExchangeRecord {
    id: ExchangeId,
    stream_id: Option<StreamId>,
    summary: RequestSummary,
    status: ExchangeStatus,
    result: Option<Result<Response>>,
}

#[derive(Debug, Default)]
struct TableState {
    records: HashMap<CorrelationKey, ExchangeRecord>,
    next_id: ExchangeId,
    abandoned: Vec<StreamId>,
}

impl TableState {
    fn record_mut(&mut self, exchange: &ExchangeRef) -> Option<&mut ExchangeRecord> {
        self.records
            .get_mut(&exchange.key)
            .filter(|record| record.id == exchange.id)
    }

    fn take_record(&mut self, key: &CorrelationKey) -> Option<ExchangeRecord> {
        let record = self.records.remove(key)?;
        if let Some(stream_id) = record.stream_id {
            if record.status != ExchangeStatus::Complete {
                self.abandoned.push(stream_id);
            }
        }
        Some(record)
    }
}

/// Concurrent table of in-flight exchanges
///
/// One mutex serialises registration, completion and removal; waiters
/// block on a shared condition variable.
#[derive(Debug, Default)]
pub struct PendingExchanges {
    state: Mutex<TableState>,
    cond: Condvar,
}

impl PendingExchanges {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new exchange in `Pending` state
    ///
    /// Fails with `DuplicateKey` while another exchange with the same key is
    /// live.
    pub fn register(self: &Arc<Self>, key: CorrelationKey, summary: RequestSummary) -> Result<ExchangeHandle> {
        let mut state = self.lock();
        if state.records.contains_key(&key) {
            return Err(Error::DuplicateKey(key.to_string()));
        }

        state.next_id += 1;
        let id = state.next_id;
        debug!(%key, exchange_id = id, path = %summary.path, "exchange registered");
        state.records.insert(
            key.clone(),
            ExchangeRecord {
                id,
                stream_id: None,
                summary,
                status: ExchangeStatus::Pending,
                result: None,
            },
        );

        Ok(ExchangeHandle {
            exchange: ExchangeRef { key, id },
            table: Arc::clone(self),
            consumed: false,
        })
    }

    /// Attach the stream id the transport assigned to an exchange
    pub fn attach_stream(&self, exchange: &ExchangeRef, stream_id: StreamId) -> bool {
        match self.lock().record_mut(exchange) {
            Some(record) => {
                record.stream_id = Some(stream_id);
                true
            }
            None => false,
        }
    }

    /// Check if the exchange is still registered
    pub fn is_live(&self, exchange: &ExchangeRef) -> bool {
        self.lock().record_mut(exchange).is_some()
    }

    /// Move an exchange to `HeadersReceived`
    pub fn mark_headers(&self, exchange: &ExchangeRef) -> bool {
        let mut state = self.lock();
        match state.record_mut(exchange) {
            Some(record) if record.status.can_advance_to(ExchangeStatus::HeadersReceived) => {
                record.status = ExchangeStatus::HeadersReceived;
                true
            }
            _ => false,
        }
    }

    /// Store the response and wake the waiter
    ///
    /// Returns false if the exchange is gone (late frame) or already settled.
    pub fn complete(&self, exchange: &ExchangeRef, response: Response) -> bool {
        self.settle(exchange, ExchangeStatus::Complete, Ok(response))
    }

    /// Store the error and wake the waiter
    ///
    /// Returns false if the exchange is gone or already settled.
    pub fn fail(&self, exchange: &ExchangeRef, error: Error) -> bool {
        self.settle(exchange, ExchangeStatus::Failed, Err(error))
    }

    fn settle(&self, exchange: &ExchangeRef, status: ExchangeStatus, result: Result<Response>) -> bool {
        let mut state = self.lock();
        let Some(record) = state.record_mut(exchange) else {
            warn!(
                key = %exchange.key,
                exchange_id = exchange.id,
                ?status,
                "no live exchange, discarding late result"
            );
            return false;
        };

        if !record.status.can_advance_to(status) {
            debug!(
                key = %exchange.key,
                exchange_id = exchange.id,
                current = ?record.status,
                "exchange already settled, ignoring"
            );
            return false;
        }

        debug!(
            key = %exchange.key,
            exchange_id = exchange.id,
            stream_id = ?record.stream_id,
            ?status,
            "exchange settled"
        );
        record.status = status;
        record.result = Some(result);
        drop(state);

        self.cond.notify_all();
        true
    }

    /// Fail every unsettled exchange, e.g. when the connection goes away
    ///
    /// Returns how many exchanges were failed.
    pub fn fail_all(&self, make_error: impl Fn() -> Error) -> usize {
        let mut state = self.lock();
        let mut failed = 0;
        for record in state.records.values_mut() {
            if record.status.can_advance_to(ExchangeStatus::Failed) {
                record.status = ExchangeStatus::Failed;
                record.result = Some(Err(make_error()));
                failed += 1;
            }
        }
        drop(state);

        if failed > 0 {
            self.cond.notify_all();
        }
        failed
    }

    /// Block until the exchange settles or `timeout` elapses, then remove it
    fn await_exchange(&self, exchange: &ExchangeRef, timeout: Duration) -> Result<Response> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            let settled = match state.record_mut(exchange) {
                Some(record) => record.status.is_settled(),
                None => return Err(Error::Internal(format!("exchange {} vanished", exchange.key))),
            };

            if settled {
                let record = state.take_record(&exchange.key);
                return record
                    .and_then(|r| r.result)
                    .unwrap_or_else(|| Err(Error::Internal("settled exchange without result".to_string())));
            }

            let now = Instant::now();
            if now >= deadline {
                if let Some(record) = state.take_record(&exchange.key) {
                    warn!(
                        key = %exchange.key,
                        exchange_id = exchange.id,
                        stream_id = ?record.stream_id,
                        method = record.summary.method,
                        "exchange timed out"
                    );
                }
                return Err(Error::Timeout);
            }

            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn remove(&self, exchange: &ExchangeRef) {
        let mut state = self.lock();
        if state.record_mut(exchange).is_some() {
            state.take_record(&exchange.key);
            debug!(key = %exchange.key, exchange_id = exchange.id, "abandoned exchange removed");
        }
    }

    /// Queue a stream whose exchange is gone before the stream ended
    pub fn abandon(&self, stream_id: StreamId) {
        self.lock().abandoned.push(stream_id);
    }

    /// Drain the streams left behind by removed exchanges
    pub fn take_abandoned(&self) -> Vec<StreamId> {
        std::mem::take(&mut self.lock().abandoned)
    }

    /// Status of the live exchange with this key
    pub fn status(&self, key: &CorrelationKey) -> Option<ExchangeStatus> {
        self.lock().records.get(key).map(|r| r.status)
    }

    /// Stream id attached to the live exchange with this key
    pub fn stream_id(&self, key: &CorrelationKey) -> Option<StreamId> {
        self.lock().records.get(key).and_then(|r| r.stream_id)
    }

    /// Number of live exchanges
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Check if no exchange is live
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}

/// Caller's handle on a registered exchange
///
/// The result is delivered at most once: `wait` consumes the handle and
/// removes the record. Dropping a handle without waiting removes the record
/// as well.
#[derive(Debug)]
pub struct ExchangeHandle {
    exchange: ExchangeRef,
    table: Arc<PendingExchanges>,
    consumed: bool,
}

impl ExchangeHandle {
    /// Reference used by the transport and the assembler
    pub fn exchange(&self) -> &ExchangeRef {
        &self.exchange
    }

    /// Correlation key of the exchange
    pub fn key(&self) -> &CorrelationKey {
        &self.exchange.key
    }

    /// Block until the exchange completes, fails, or `timeout` elapses
    pub fn wait(mut self, timeout: Duration) -> Result<Response> {
        self.consumed = true;
        self.table.await_exchange(&self.exchange, timeout)
    }
}

impl Drop for ExchangeHandle {
    fn drop(&mut self) {
        if !self.consumed {
            self.table.remove(&self.exchange);
        }
    }
}
