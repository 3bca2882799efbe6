//! Typed event handlers.
//!
//! Every handler runs the same pipeline: validate the decoded payload, persist
//! through its repository, then fan out through the hub. Nothing is persisted
//! or broadcast for a payload that fails validation, and nothing is broadcast
//! if persistence fails.

mod chat;
mod comment;
mod room;

pub use chat::ChatHandler;
pub use comment::CommentHandler;
pub use room::RoomHandler;

use hubbub_protocol::{CodecError, ErrorCode, ServerEvent, ValidationError};
use hubbub_transport::ConnectionId;
use thiserror::Error;

use crate::hub::HubError;
use crate::repository::RepositoryError;
use crate::traits::Peer;

/// Errors surfaced to the sender as an `ERROR` event.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Frame is not a structured event.
    #[error("invalid event format: {0}")]
    InvalidFormat(String),

    /// Discriminator names no handler.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Payload failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Repository refused the write.
    #[error("failed to persist event: {0}")]
    Persistence(#[from] RepositoryError),

    /// A direct send found the target's queue full.
    #[error("send buffer full for connection {0}")]
    SendBufferFull(ConnectionId),

    /// Any other delivery failure.
    #[error("delivery failed: {0}")]
    Delivery(HubError),
}

impl HandlerError {
    /// Machine-readable code for the `ERROR` event.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            HandlerError::InvalidFormat(_) => Some(ErrorCode::InvalidFormat),
            HandlerError::UnknownEventType(_) => Some(ErrorCode::UnknownEventType),
            HandlerError::Validation(_) => Some(ErrorCode::ValidationFailed),
            HandlerError::Persistence(_) => Some(ErrorCode::PersistenceFailed),
            HandlerError::SendBufferFull(_) => Some(ErrorCode::SendBufferFull),
            HandlerError::Delivery(_) => None,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::InvalidFormat(_) => "invalid_format",
            HandlerError::UnknownEventType(_) => "unknown_event_type",
            HandlerError::Validation(_) => "validation",
            HandlerError::Persistence(_) => "persistence",
            HandlerError::SendBufferFull(_) => "send_buffer_full",
            HandlerError::Delivery(_) => "delivery",
        }
    }

    /// The `ERROR` event reported back to the sender.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            message: self.to_string(),
            code: self.code(),
        }
    }
}

impl From<CodecError> for HandlerError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnknownEventType(name) => HandlerError::UnknownEventType(name),
            CodecError::InvalidFormat(reason) => HandlerError::InvalidFormat(reason),
            other => HandlerError::InvalidFormat(other.to_string()),
        }
    }
}

impl From<HubError> for HandlerError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::SendBufferFull(id) => HandlerError::SendBufferFull(id),
            other => HandlerError::Delivery(other),
        }
    }
}

/// The name an event is attributed to: the claimed `user`, or the
/// connection's display name when none was given.
fn author<'a>(claimed: &'a str, peer: &'a dyn Peer) -> &'a str {
    if claimed.is_empty() {
        peer.display_name()
    } else {
        claimed
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fakes shared by handler and router tests.

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use hubbub_protocol::{PostId, RoomName, ServerEvent};
    use hubbub_transport::ConnectionId;

    use crate::hub::HubError;
    use crate::repository::{
        CommentRepository, MessageRepository, RepositoryError, StoredComment, StoredMessage,
    };
    use crate::traits::{Fanout, Peer};

    /// Everything a handler did, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Effect {
        SavedMessage(StoredMessage),
        SavedComment(StoredComment),
        Joined(String),
        Left(String),
        Subscribed(String),
        RoomBroadcast(String, ServerEvent),
        PostBroadcast(String, ServerEvent),
        Direct(ConnectionId, ServerEvent),
    }

    pub type Log = Arc<Mutex<Vec<Effect>>>;

    pub struct FakePeer {
        pub id: ConnectionId,
        pub name: String,
    }

    impl FakePeer {
        pub fn new(name: &str) -> Self {
            Self {
                id: ConnectionId::new(format!("conn-{name}")),
                name: name.to_string(),
            }
        }
    }

    impl Peer for FakePeer {
        fn id(&self) -> &ConnectionId {
            &self.id
        }

        fn display_name(&self) -> &str {
            &self.name
        }

        fn send_direct(&self, _event: &ServerEvent) -> Result<(), HubError> {
            Ok(())
        }
    }

    pub struct FakeHub {
        pub log: Log,
        pub direct_full: bool,
    }

    impl FakeHub {
        pub fn new(log: Log) -> Self {
            Self {
                log,
                direct_full: false,
            }
        }
    }

    impl Fanout for FakeHub {
        fn join_room(&self, _id: &ConnectionId, room: &RoomName) -> bool {
            self.log
                .lock()
                .unwrap()
                .push(Effect::Joined(room.to_string()));
            true
        }

        fn leave_room(&self, _id: &ConnectionId, room: &RoomName) -> bool {
            self.log
                .lock()
                .unwrap()
                .push(Effect::Left(room.to_string()));
            true
        }

        fn subscribe_post(&self, _id: &ConnectionId, post: &PostId) -> bool {
            self.log
                .lock()
                .unwrap()
                .push(Effect::Subscribed(post.to_string()));
            true
        }

        fn broadcast_room(&self, room: &RoomName, event: &ServerEvent) -> Result<usize, HubError> {
            self.log
                .lock()
                .unwrap()
                .push(Effect::RoomBroadcast(room.to_string(), event.clone()));
            Ok(1)
        }

        fn broadcast_post(&self, post: &PostId, event: &ServerEvent) -> Result<usize, HubError> {
            self.log
                .lock()
                .unwrap()
                .push(Effect::PostBroadcast(post.to_string(), event.clone()));
            Ok(1)
        }

        fn send_direct(&self, id: &ConnectionId, event: &ServerEvent) -> Result<(), HubError> {
            if self.direct_full {
                return Err(HubError::SendBufferFull(id.clone()));
            }
            self.log
                .lock()
                .unwrap()
                .push(Effect::Direct(id.clone(), event.clone()));
            Ok(())
        }
    }

    /// Repository that records into the shared log, or fails every write.
    pub struct FakeStore {
        pub log: Log,
        pub fail: bool,
    }

    impl FakeStore {
        pub fn new(log: Log) -> Self {
            Self { log, fail: false }
        }

        pub fn failing(log: Log) -> Self {
            Self { log, fail: true }
        }
    }

    #[async_trait]
    impl MessageRepository for FakeStore {
        async fn save_message(&self, message: &StoredMessage) -> Result<(), RepositoryError> {
            if self.fail {
                return Err(RepositoryError::Unavailable("disk on fire".into()));
            }
            self.log
                .lock()
                .unwrap()
                .push(Effect::SavedMessage(message.clone()));
            Ok(())
        }

        async fn recent_messages(
            &self,
            _room_id: &str,
            _limit: usize,
        ) -> Result<Vec<StoredMessage>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl CommentRepository for FakeStore {
        async fn create_comment(&self, comment: &StoredComment) -> Result<(), RepositoryError> {
            if self.fail {
                return Err(RepositoryError::Unavailable("disk on fire".into()));
            }
            self.log
                .lock()
                .unwrap()
                .push(Effect::SavedComment(comment.clone()));
            Ok(())
        }

        async fn comments_for_post(
            &self,
            _post_id: &str,
            _limit: usize,
        ) -> Result<Vec<StoredComment>, RepositoryError> {
            Ok(Vec::new())
        }
    }
}
