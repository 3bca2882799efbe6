//! `CHAT_MESSAGE` handler.
//!
//! Senders do not have to be members of the room they write to; the message
//! is persisted and broadcast to whoever is in the room.

use std::sync::Arc;

use hubbub_protocol::events::ChatMessage;
use hubbub_protocol::validate::validate_chat_message;
use hubbub_protocol::ServerEvent;
use tracing::{debug, warn};

use super::{author, HandlerError};
use crate::message::{now_millis, IdGenerator};
use crate::repository::{MessageRepository, StoredMessage};
use crate::traits::{Fanout, Peer};

/// Message kind recorded for user chat messages.
pub const CHAT_KIND: &str = "chat";

/// Persists chat messages and broadcasts them to the room.
pub struct ChatHandler {
    repo: Arc<dyn MessageRepository>,
    ids: IdGenerator,
}

impl ChatHandler {
    /// Create a handler writing to `repo`.
    #[must_use]
    pub fn new(repo: Arc<dyn MessageRepository>) -> Self {
        Self {
            repo,
            ids: IdGenerator::new("msg"),
        }
    }

    /// Handle a decoded `CHAT_MESSAGE`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad payload and a persistence error
    /// if the repository rejects the message. Nothing is broadcast in either
    /// case.
    pub async fn handle(
        &self,
        peer: &dyn Peer,
        hub: &dyn Fanout,
        event: ChatMessage,
    ) -> Result<(), HandlerError> {
        let room = validate_chat_message(&event)?;
        let user = author(&event.user, peer).to_string();

        let stored = StoredMessage {
            id: self.ids.next_id(),
            username: user,
            content: event.message,
            room_id: room.as_str().to_string(),
            kind: CHAT_KIND.to_string(),
            timestamp: now_millis(),
        };

        if let Err(e) = self.repo.save_message(&stored).await {
            warn!(connection = %peer.id(), room = %room, error = %e, "Failed to save chat message");
            return Err(e.into());
        }

        let delivered = hub.broadcast_room(
            &room,
            &ServerEvent::ChatMessage {
                id: stored.id,
                room: stored.room_id,
                user: stored.username,
                message: stored.content,
                timestamp: stored.timestamp,
            },
        )?;
        debug!(connection = %peer.id(), room = %room, delivered, "Chat message broadcast");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{Effect, FakeHub, FakePeer, FakeStore};
    use std::sync::Mutex;

    fn chat(room: &str, user: &str, message: &str) -> ChatMessage {
        ChatMessage {
            room: room.to_string(),
            user: user.to_string(),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_persists_before_broadcast() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = ChatHandler::new(Arc::new(FakeStore::new(log.clone())));
        let hub = FakeHub::new(log.clone());
        let peer = FakePeer::new("alice");

        handler
            .handle(&peer, &hub, chat("general", "alice", "hi"))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        let Effect::SavedMessage(saved) = &log[0] else {
            panic!("Expected save first, got {:?}", log[0]);
        };
        assert_eq!(saved.room_id, "general");
        assert_eq!(saved.kind, "chat");
        assert!(saved.id.starts_with("msg_"));

        let Effect::RoomBroadcast(room, ServerEvent::ChatMessage { id, user, message, .. }) =
            &log[1]
        else {
            panic!("Expected broadcast second, got {:?}", log[1]);
        };
        assert_eq!(room, "general");
        assert_eq!(id, &saved.id);
        assert_eq!(user, "alice");
        assert_eq!(message, "hi");
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_broadcast() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = ChatHandler::new(Arc::new(FakeStore::failing(log.clone())));
        let hub = FakeHub::new(log.clone());
        let peer = FakePeer::new("alice");

        let err = handler
            .handle(&peer, &hub, chat("general", "alice", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Persistence(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_has_no_effect() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = ChatHandler::new(Arc::new(FakeStore::new(log.clone())));
        let hub = FakeHub::new(log.clone());
        let peer = FakePeer::new("alice");

        let too_long = "x".repeat(1001);
        let err = handler
            .handle(&peer, &hub, chat("general", "alice", &too_long))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Validation(ref v) if v.field == "message"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_user_falls_back_to_display_name() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = ChatHandler::new(Arc::new(FakeStore::new(log.clone())));
        let hub = FakeHub::new(log.clone());
        let peer = FakePeer::new("anonymous");

        handler
            .handle(&peer, &hub, chat("General", "", "hello"))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert!(matches!(&log[0], Effect::SavedMessage(m) if m.username == "anonymous" && m.room_id == "general"));
    }
}
