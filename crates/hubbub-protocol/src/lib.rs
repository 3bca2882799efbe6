//! # hubbub-protocol
//!
//! Wire envelope definitions for the hubbub realtime hub.
//!
//! Every frame exchanged over a connection is a JSON object tagged by its
//! `type` field (the discriminator):
//!
//! - `JOIN_ROOM` / `ROOM_JOINED` - Chat room membership
//! - `CHAT_MESSAGE` - Messages fanned out to a room
//! - `POST_COMMENT` - Comments fanned out to a post's subscribers
//! - `ERROR` - Server-to-client error report
//!
//! ## Example
//!
//! ```rust
//! use hubbub_protocol::{codec, EventKind, ServerEvent};
//!
//! let raw = br#"{"type":"JOIN_ROOM","room":"general","user":"alice"}"#;
//! assert_eq!(codec::peek_kind(raw).unwrap(), EventKind::JoinRoom);
//!
//! let reply = ServerEvent::room_joined("general", "alice");
//! let encoded = codec::encode(&reply).unwrap();
//! assert!(encoded.contains("ROOM_JOINED"));
//! ```

pub mod codec;
pub mod events;
pub mod limits;
pub mod validate;

pub use codec::{decode, encode, peek_kind, CodecError};
pub use events::{
    ChatMessage, ClientEvent, ErrorCode, EventKind, JoinRoom, LeaveRoom, PostComment,
    ServerEvent,
};
pub use validate::{PostId, RoomName, ValidationError};
