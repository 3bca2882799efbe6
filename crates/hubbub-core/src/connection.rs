//! Registry-side view of a connection.
//!
//! A [`ConnectionHandle`] is shared between the registry, every group the
//! connection belongs to, and the connection's own actor. It owns the sending
//! half of the bounded outbound queue and the close signal; the receiving half
//! belongs to the actor's writer.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use hubbub_protocol::{codec, ServerEvent};
use hubbub_transport::ConnectionId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::hub::HubError;
use crate::traits::Peer;

/// Lifecycle of a connection. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a frame could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The outbound queue is at capacity.
    Full,
    /// The connection has been closed.
    Closed,
}

/// Shared handle to a live connection.
pub struct ConnectionHandle {
    id: ConnectionId,
    display_name: String,
    tx: mpsc::Sender<Arc<str>>,
    state: AtomicU8,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle and the receiving half of its outbound queue.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        display_name: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id,
            display_name: display_name.into(),
            tx,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        (handle, rx)
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Display name given at handshake time.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advance the lifecycle state. Attempts to move backwards are ignored.
    pub(crate) fn advance(&self, state: ConnectionState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the connection's outbound queue and signal its actor.
    ///
    /// Returns `true` for the call that actually closed it; every later call
    /// is a no-op returning `false`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.advance(ConnectionState::Closing);
        self.shutdown.cancel();
        debug!(connection = %self.id, "Connection closing");
        true
    }

    /// Resolves once the connection has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// Enqueue an already-encoded frame without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] if the queue is at capacity and
    /// [`EnqueueError::Closed`] once the connection is closed.
    pub fn try_enqueue(&self, frame: Arc<str>) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Frames currently waiting in the outbound queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Peer for ConnectionHandle {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn send_direct(&self, event: &ServerEvent) -> Result<(), HubError> {
        let frame = codec::encode(event)?;
        self.try_enqueue(frame).map_err(|e| match e {
            EnqueueError::Full => HubError::SendBufferFull(self.id.clone()),
            EnqueueError::Closed => HubError::ConnectionClosed(self.id.clone()),
        })
    }
}
