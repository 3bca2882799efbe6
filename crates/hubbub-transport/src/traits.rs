//! Transport abstraction traits for hubbub.
//!
//! These traits define the interface that all transport implementations must
//! provide, allowing the connection actor to be transport-agnostic.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Per-process counter so IDs generated within the same nanosecond differ.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("client_{:x}_{}", timestamp, seq))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Heartbeat request.
    Ping(Vec<u8>),
    /// Heartbeat reply.
    Pong(Vec<u8>),
    /// Close handshake.
    Close,
}

impl TransportMessage {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            TransportMessage::Text(text) => text.len(),
            TransportMessage::Binary(data)
            | TransportMessage::Ping(data)
            | TransportMessage::Pong(data) => data.len(),
            TransportMessage::Close => 0,
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is a data frame (text or binary) as opposed to control.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, TransportMessage::Text(_) | TransportMessage::Binary(_))
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Inbound frame exceeds the configured limit.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` if the connection was closed cleanly.
    async fn recv(&mut self) -> Result<Option<TransportMessage>, TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a message.
    async fn send(&mut self, message: TransportMessage) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("client_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(id.to_string(), "test-id");
    }

    #[test]
    fn test_message_len() {
        assert_eq!(TransportMessage::Text("hello".into()).len(), 5);
        assert_eq!(TransportMessage::Binary(vec![0; 3]).len(), 3);
        assert!(TransportMessage::Close.is_empty());
        assert!(!TransportMessage::Ping(vec![]).is_data());
    }
}
