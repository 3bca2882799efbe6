//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into a [`FrameSource`] /
//! [`FrameSink`] pair so the reader and writer can run on separate tasks.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::traits::{FrameSink, FrameSource, TransportError, TransportMessage};

/// Split an upgraded WebSocket into independent read and write halves.
#[must_use]
pub fn split(socket: WebSocket, remote_addr: Option<String>) -> (WebSocketSource, WebSocketSink) {
    let (sink, stream) = socket.split();
    (
        WebSocketSource {
            stream,
            remote_addr,
        },
        WebSocketSink { sink },
    )
}

/// Read half of a WebSocket connection.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
    remote_addr: Option<String>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<TransportMessage>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(TransportMessage::Text(text))),
            Some(Ok(Message::Binary(data))) => Ok(Some(TransportMessage::Binary(data))),
            Some(Ok(Message::Ping(data))) => Ok(Some(TransportMessage::Ping(data))),
            Some(Ok(Message::Pong(data))) => Ok(Some(TransportMessage::Pong(data))),
            Some(Ok(Message::Close(frame))) => {
                debug!(reason = ?frame, "Received close frame");
                Ok(None)
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket receive error");
                Err(TransportError::ReceiveFailed(e.to_string()))
            }
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }
}

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, message: TransportMessage) -> Result<(), TransportError> {
        let message = match message {
            TransportMessage::Text(text) => Message::Text(text),
            TransportMessage::Binary(data) => Message::Binary(data),
            TransportMessage::Ping(data) => Message::Ping(data),
            TransportMessage::Pong(data) => Message::Pong(data),
            TransportMessage::Close => Message::Close(None),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // The peer may already be gone; the close frame is best-effort.
        let _ = self.sink.send(Message::Close(None)).await;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}
