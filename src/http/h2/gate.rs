//! SETTINGS handshake gate
//!
//! No request stream may be opened before the peer's initial SETTINGS have
//! been received and acknowledged. The gate is a one-shot broadcast barrier:
//! the connection's event path signals it once, and every caller waiting in
//! `wait` (now or later) is released.

use super::error::{Error, Result};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Progress of the peer's initial SETTINGS round trip
///
/// Starts false/false when the connection opens; each flag flips to true
/// exactly once and is never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsState {
    /// Peer SETTINGS frame received
    pub received: bool,
    /// Our SETTINGS ACK written
    pub acknowledged: bool,
}

#[derive(Debug, Default)]
struct GateInner {
    state: SettingsState,
    closed: bool,
}

/// One-shot barrier guarding application streams on a connection
#[derive(Debug, Default)]
pub struct SettingsGate {
    inner: Mutex<GateInner>,
    cond: Condvar,
}

impl SettingsGate {
    /// Create a closed gate for a new connection
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that the peer's SETTINGS frame arrived
    pub fn mark_received(&self) {
        self.lock().state.received = true;
    }

    /// Open the gate after the peer's SETTINGS were acknowledged
    ///
    /// Releases all waiters. Calling it again is a no-op.
    pub fn signal(&self) {
        let mut inner = self.lock();
        if inner.state.acknowledged {
            return;
        }
        inner.state = SettingsState {
            received: true,
            acknowledged: true,
        };
        drop(inner);

        tracing::debug!("settings acknowledged, gate open");
        self.cond.notify_all();
    }

    /// Release waiters because the connection ended before the handshake
    ///
    /// Has no effect on an already opened gate.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state.acknowledged || inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);

        self.cond.notify_all();
    }

    /// Wait until the gate opens or `timeout` elapses
    ///
    /// Fails with `Timeout` at the deadline, or `ConnectionClosed` if the
    /// connection ended before the handshake completed.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();

        loop {
            if inner.state.acknowledged {
                return Ok(());
            }
            if inner.closed {
                return Err(Error::ConnectionClosed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }

            inner = self
                .cond
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Check whether application streams are permitted
    pub fn is_open(&self) -> bool {
        self.lock().state.acknowledged
    }

    /// Snapshot of the handshake progress
    pub fn state(&self) -> SettingsState {
        self.lock().state
    }
}
