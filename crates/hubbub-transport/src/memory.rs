//! In-memory transport.
//!
//! [`duplex`] returns the server-side halves of a connection together with a
//! [`MemoryPeer`] that plays the remote client. Frames travel over bounded
//! tokio channels, so backpressure behaves like a real socket whose peer
//! stops reading.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameSource, TransportError, TransportMessage};

type Inbound = Result<TransportMessage, TransportError>;

/// Create a connected in-memory transport.
///
/// `capacity` bounds each direction independently.
#[must_use]
pub fn duplex(capacity: usize) -> (MemorySource, MemorySink, MemoryPeer) {
    let (to_server, from_peer) = mpsc::channel(capacity);
    let (to_peer, from_server) = mpsc::channel(capacity);

    (
        MemorySource { rx: from_peer },
        MemorySink { tx: Some(to_peer) },
        MemoryPeer {
            tx: Some(to_server),
            rx: from_server,
        },
    )
}

/// Server-side read half.
pub struct MemorySource {
    rx: mpsc::Receiver<Inbound>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<TransportMessage>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(TransportMessage::Close)) | None => Ok(None),
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Server-side write half.
pub struct MemorySink {
    tx: Option<mpsc::Sender<TransportMessage>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, message: TransportMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(tx) = self.tx.take() {
            // Peer may have hung up already.
            let _ = tx.send(TransportMessage::Close).await;
        }
        Ok(())
    }
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::Sender<Inbound>>,
    rx: mpsc::Receiver<TransportMessage>,
}

impl MemoryPeer {
    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped or the peer
    /// already hung up.
    pub async fn send(&self, message: TransportMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Ok(message))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// See [`MemoryPeer::send`].
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(TransportMessage::Text(text.into())).await
    }

    /// Inject a transport failure into the server's read half.
    ///
    /// # Errors
    ///
    /// See [`MemoryPeer::send`].
    pub async fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Err(error))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server's write half is gone.
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        self.rx.recv().await
    }

    /// Receive a frame without waiting.
    pub fn try_recv(&mut self) -> Option<TransportMessage> {
        self.rx.try_recv().ok()
    }

    /// Hang up: the server's read half sees end-of-stream.
    pub fn close(&mut self) {
        self.tx = None;
    }
}
