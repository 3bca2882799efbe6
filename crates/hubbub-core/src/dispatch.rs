//! Event routing.
//!
//! The router reads only the discriminator of an inbound frame, then decodes
//! the payload for the matching handler. Dispatch is an exhaustive `match`
//! over [`EventKind`], so a new kind does not compile until it is routed.

use std::sync::Arc;

use hubbub_protocol::{codec, EventKind};
use tracing::trace;

use crate::handlers::{ChatHandler, CommentHandler, HandlerError, RoomHandler};
use crate::repository::{CommentRepository, MessageRepository};
use crate::traits::{Fanout, Peer};

/// Dispatches inbound frames to typed handlers.
pub struct EventRouter {
    rooms: RoomHandler,
    chat: ChatHandler,
    comments: CommentHandler,
}

impl EventRouter {
    /// Create a router whose handlers persist to the given repositories.
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        comments: Arc<dyn CommentRepository>,
    ) -> Self {
        Self {
            rooms: RoomHandler::new(),
            chat: ChatHandler::new(messages),
            comments: CommentHandler::new(comments),
        }
    }

    /// Route one raw frame from `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidFormat`] if the frame is not a JSON
    /// object with a string `type`, [`HandlerError::UnknownEventType`] if no
    /// handler exists for it, and otherwise whatever the handler returns.
    pub async fn route(
        &self,
        peer: &dyn Peer,
        hub: &dyn Fanout,
        raw: &[u8],
    ) -> Result<(), HandlerError> {
        let kind = codec::peek_kind(raw)?;
        trace!(connection = %peer.id(), kind = %kind, size = raw.len(), "Routing event");

        match kind {
            EventKind::JoinRoom => self.rooms.handle(peer, hub, codec::decode(kind, raw)?),
            EventKind::LeaveRoom => self.rooms.leave(peer, hub, codec::decode(kind, raw)?),
            EventKind::ChatMessage => {
                self.chat
                    .handle(peer, hub, codec::decode(kind, raw)?)
                    .await
            }
            EventKind::PostComment => {
                self.comments
                    .handle(peer, hub, codec::decode(kind, raw)?)
                    .await
            }
        }
    }
}
