//! Event envelopes for the hubbub protocol.
//!
//! Client events are decoded in two steps: the discriminator is peeked
//! first (see [`crate::codec::peek_kind`]), then the matching payload struct
//! is decoded in full. Server events are a single tagged enum serialized
//! once per fan-out.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-to-server event kinds.
///
/// This is the closed set of discriminators the hub dispatches on. Adding a
/// kind here forces every `match` over it to handle the new variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JoinRoom,
    LeaveRoom,
    ChatMessage,
    PostComment,
}

impl EventKind {
    /// Every dispatchable kind.
    pub const ALL: [EventKind; 4] = [
        EventKind::JoinRoom,
        EventKind::LeaveRoom,
        EventKind::ChatMessage,
        EventKind::PostComment,
    ];

    /// The discriminator string used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::JoinRoom => "JOIN_ROOM",
            EventKind::LeaveRoom => "LEAVE_ROOM",
            EventKind::ChatMessage => "CHAT_MESSAGE",
            EventKind::PostComment => "POST_COMMENT",
        }
    }

    /// Look up a kind by its discriminator string.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `JOIN_ROOM` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoom {
    /// Room to join.
    #[serde(default)]
    pub room: String,
    /// Claimed user name (falls back to the connection's display name).
    #[serde(default)]
    pub user: String,
}

/// `LEAVE_ROOM` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRoom {
    /// Room to leave.
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub user: String,
}

/// `CHAT_MESSAGE` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Target room.
    #[serde(default)]
    pub room: String,
    /// Sender name.
    #[serde(default)]
    pub user: String,
    /// Message text.
    #[serde(default)]
    pub message: String,
}

/// `POST_COMMENT` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostComment {
    /// Post being commented on.
    #[serde(default)]
    pub post_id: String,
    /// Commenter name.
    #[serde(default)]
    pub user: String,
    /// Comment text.
    #[serde(default)]
    pub comment: String,
}

/// A complete client event, used by clients and tests to build frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "JOIN_ROOM")]
    JoinRoom(JoinRoom),
    #[serde(rename = "LEAVE_ROOM")]
    LeaveRoom(LeaveRoom),
    #[serde(rename = "CHAT_MESSAGE")]
    ChatMessage(ChatMessage),
    #[serde(rename = "POST_COMMENT")]
    PostComment(PostComment),
}

impl ClientEvent {
    /// Build a `JOIN_ROOM` event.
    #[must_use]
    pub fn join_room(room: impl Into<String>, user: impl Into<String>) -> Self {
        ClientEvent::JoinRoom(JoinRoom {
            room: room.into(),
            user: user.into(),
        })
    }

    /// Build a `LEAVE_ROOM` event.
    #[must_use]
    pub fn leave_room(room: impl Into<String>, user: impl Into<String>) -> Self {
        ClientEvent::LeaveRoom(LeaveRoom {
            room: room.into(),
            user: user.into(),
        })
    }

    /// Build a `CHAT_MESSAGE` event.
    #[must_use]
    pub fn chat_message(
        room: impl Into<String>,
        user: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ClientEvent::ChatMessage(ChatMessage {
            room: room.into(),
            user: user.into(),
            message: message.into(),
        })
    }

    /// Build a `POST_COMMENT` event.
    #[must_use]
    pub fn post_comment(
        post_id: impl Into<String>,
        user: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        ClientEvent::PostComment(PostComment {
            post_id: post_id.into(),
            user: user.into(),
            comment: comment.into(),
        })
    }

    /// The kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::JoinRoom(_) => EventKind::JoinRoom,
            ClientEvent::LeaveRoom(_) => EventKind::LeaveRoom,
            ClientEvent::ChatMessage(_) => EventKind::ChatMessage,
            ClientEvent::PostComment(_) => EventKind::PostComment,
        }
    }
}

/// Machine-readable code attached to `ERROR` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidFormat,
    UnknownEventType,
    ValidationFailed,
    PersistenceFailed,
    SendBufferFull,
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Acknowledges a `JOIN_ROOM`.
    #[serde(rename = "ROOM_JOINED")]
    RoomJoined {
        /// Room that was joined.
        room: String,
        /// Display name of the joining connection.
        user: String,
    },

    /// Acknowledges a `LEAVE_ROOM`.
    #[serde(rename = "ROOM_LEFT")]
    RoomLeft {
        /// Room that was left.
        room: String,
        /// Display name of the leaving connection.
        user: String,
    },

    /// A persisted chat message.
    #[serde(rename = "CHAT_MESSAGE")]
    ChatMessage {
        /// Server-assigned message ID.
        id: String,
        /// Room the message was sent to.
        room: String,
        /// Sender name.
        user: String,
        /// Message text.
        message: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },

    /// A persisted post comment.
    #[serde(rename = "POST_COMMENT")]
    PostComment {
        /// Server-assigned comment ID.
        id: String,
        /// Post the comment belongs to.
        post_id: String,
        /// Commenter name.
        user: String,
        /// Comment text.
        comment: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },

    /// Error report.
    #[serde(rename = "ERROR")]
    Error {
        /// Human-readable error message.
        message: String,
        /// Optional machine-readable code.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl ServerEvent {
    /// Create a `ROOM_JOINED` acknowledgement.
    #[must_use]
    pub fn room_joined(room: impl Into<String>, user: impl Into<String>) -> Self {
        ServerEvent::RoomJoined {
            room: room.into(),
            user: user.into(),
        }
    }

    /// Create a `ROOM_LEFT` acknowledgement.
    #[must_use]
    pub fn room_left(room: impl Into<String>, user: impl Into<String>) -> Self {
        ServerEvent::RoomLeft {
            room: room.into(),
            user: user.into(),
        }
    }

    /// Create an `ERROR` event without a code.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code: None,
        }
    }

    /// Create an `ERROR` event with a code.
    #[must_use]
    pub fn error_with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code: Some(code),
        }
    }

    /// The discriminator string of this event.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerEvent::RoomJoined { .. } => "ROOM_JOINED",
            ServerEvent::RoomLeft { .. } => "ROOM_LEFT",
            ServerEvent::ChatMessage { .. } => "CHAT_MESSAGE",
            ServerEvent::PostComment { .. } => "POST_COMMENT",
            ServerEvent::Error { .. } => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("join_room"), None);
        assert_eq!(EventKind::from_name("ROOM_JOINED"), None);
    }

    #[test]
    fn test_room_joined_wire_shape() {
        let value = serde_json::to_value(ServerEvent::room_joined("general", "alice")).unwrap();
        assert_eq!(
            value,
            json!({"type": "ROOM_JOINED", "room": "general", "user": "alice"})
        );
    }

    #[test]
    fn test_leave_room_wire_shape() {
        let event = ClientEvent::leave_room("general", "alice");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "LEAVE_ROOM", "room": "general", "user": "alice"})
        );
        assert_eq!(event.kind(), EventKind::LeaveRoom);

        let ack = serde_json::to_value(ServerEvent::room_left("general", "alice")).unwrap();
        assert_eq!(ack["type"], "ROOM_LEFT");
        assert_eq!(ServerEvent::room_left("general", "alice").type_name(), "ROOM_LEFT");
    }

    #[test]
    fn test_error_code_is_optional_on_the_wire() {
        let plain = serde_json::to_value(ServerEvent::error("boom")).unwrap();
        assert_eq!(plain, json!({"type": "ERROR", "message": "boom"}));

        let coded = serde_json::to_value(ServerEvent::error_with_code(
            "too long",
            ErrorCode::ValidationFailed,
        ))
        .unwrap();
        assert_eq!(coded["code"], "VALIDATION_FAILED");
    }

    #[test]
    fn test_client_event_tagging() {
        let event = ClientEvent::post_comment("post-1", "bob", "nice");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "POST_COMMENT", "post_id": "post-1", "user": "bob", "comment": "nice"})
        );
        assert_eq!(event.kind(), EventKind::PostComment);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let chat: ChatMessage = serde_json::from_str(r#"{"type":"CHAT_MESSAGE"}"#).unwrap();
        assert!(chat.room.is_empty());
        assert!(chat.message.is_empty());
    }
}
