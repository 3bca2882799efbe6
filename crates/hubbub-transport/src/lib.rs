//! # hubbub-transport
//!
//! Transport abstraction layer for the hubbub realtime hub.
//!
//! A connected client is seen by the hub as two halves:
//!
//! - **`FrameSource`** - inbound frames, read by one task at a time
//! - **`FrameSink`** - outbound frames, written by one task at a time
//!
//! Implementations:
//!
//! - **WebSocket** - axum's upgraded socket (feature `websocket`, default)
//! - **Memory** - an in-process duplex pipe for tests and benchmarks
//!
//! ```rust,ignore
//! use hubbub_transport::{FrameSource, TransportMessage};
//!
//! async fn drain(mut source: impl FrameSource) {
//!     while let Ok(Some(msg)) = source.recv().await {
//!         if let TransportMessage::Text(text) = msg {
//!             // Route text frame
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, FrameSink, FrameSource, TransportError, TransportMessage};
