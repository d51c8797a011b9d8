//! Table of open WebSocket connections and their outbound queues.
//!
//! The hub writes through here without awaiting: every send is a `try_send`
//! so one slow client never stalls routing for everyone else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vicinity_core::ConnectionId;

/// Close code sent when a session is dropped for missing heartbeats.
pub const CLOSE_STALE: u16 = 4000;
/// Close code sent after a failed authentication.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// One item on a connection's outbound queue.
#[derive(Clone, Debug, PartialEq)]
pub enum Outgoing {
    Text(Arc<str>),
    /// Close the socket after everything queued before it was written.
    Close { code: u16, reason: &'static str },
}

struct ConnectionEntry {
    tx: mpsc::Sender<Outgoing>,
    closed: CancellationToken,
}

/// Receiving half handed to the session that owns the socket.
pub struct ConnectionReceiver {
    pub rx: mpsc::Receiver<Outgoing>,
    /// Cancelled when the server wants the socket gone and the queue is full.
    pub closed: CancellationToken,
}

pub struct ConnectionTable {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    max_send_queue: usize,
    dropped_total: AtomicU64,
}

impl ConnectionTable {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Open a new connection entry.
    pub fn register(&self) -> (ConnectionId, ConnectionReceiver) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let closed = CancellationToken::new();
        self.connections.insert(
            id.clone(),
            ConnectionEntry {
                tx,
                closed: closed.clone(),
            },
        );
        (id, ConnectionReceiver { rx, closed })
    }

    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Messages discarded because a queue was full.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Queue text for one connection. Returns `false` if the connection is
    /// gone or its queue is full.
    pub fn send(&self, id: &ConnectionId, text: Arc<str>) -> bool {
        let Some(entry) = self.connections.get(id) else {
            return false;
        };
        match entry.tx.try_send(Outgoing::Text(text)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                warn!(connection_id = %id, "send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id = %id, "send queue closed");
                false
            }
        }
    }

    /// Ask the session to close the socket. Queued messages go out first
    /// unless the queue is full, in which case the socket is closed at once.
    pub fn close(&self, id: &ConnectionId, code: u16, reason: &'static str) {
        let Some(entry) = self.connections.get(id) else {
            return;
        };
        if entry.tx.try_send(Outgoing::Close { code, reason }).is_err() {
            entry.closed.cancel();
        }
    }
}
