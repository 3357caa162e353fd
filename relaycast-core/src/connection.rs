use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Generate a 12-character nanoid for connection handles
fn generate_id() -> String {
    nanoid!(12)
}

/// Opaque handle identifying one client session (CHAR(12) nanoid)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(generate_id())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a forward to one destination did not go through
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The destination's send queue is full (client too slow to drain it)
    #[error("send queue full")]
    QueueFull,

    /// The destination's writer task is gone
    #[error("connection closed")]
    Closed,
}

/// One live client session, as seen by the registry.
///
/// The WebSocket itself stays with the per-connection tasks. This handle
/// carries the outbound send capability (a bounded queue drained by the
/// connection's writer task) and the open-state flag, and is cheap to
/// clone into broadcast snapshots.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: ConnectionId,
    sender: mpsc::Sender<Bytes>,
    open: Arc<AtomicBool>,
    connected_at: Instant,
}

impl ClientConnection {
    #[must_use]
    pub fn new(id: ConnectionId, sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            sender,
            open: Arc::new(AtomicBool::new(true)),
            connected_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Whether the transport was still open at the last observation.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Mark the transport closed. Terminal: a reconnecting client gets a
    /// fresh connection with a new handle.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    /// Clone of the open-state flag alone, for tasks that must observe
    /// or record closure without holding a sender. The task draining
    /// the queue must never keep a full connection handle: its embedded
    /// sender would stop the queue from ever closing.
    #[must_use]
    pub fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Queue a payload for the connection's writer task without blocking.
    pub fn forward(&self, payload: Bytes) -> Result<(), ForwardError> {
        self.sender.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ForwardError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ForwardError::Closed,
        })
    }
}
