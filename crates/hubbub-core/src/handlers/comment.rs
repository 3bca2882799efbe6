//! `POST_COMMENT` handler.

use std::sync::Arc;

use hubbub_protocol::events::PostComment;
use hubbub_protocol::validate::validate_post_comment;
use hubbub_protocol::ServerEvent;
use tracing::{debug, warn};

use super::{author, HandlerError};
use crate::message::{now_millis, IdGenerator};
use crate::repository::{CommentRepository, StoredComment};
use crate::traits::{Fanout, Peer};

/// Persists comments, subscribes the commenter to the post and broadcasts
/// to every subscriber.
pub struct CommentHandler {
    repo: Arc<dyn CommentRepository>,
    ids: IdGenerator,
}

impl CommentHandler {
    /// Create a handler writing to `repo`.
    #[must_use]
    pub fn new(repo: Arc<dyn CommentRepository>) -> Self {
        Self {
            repo,
            ids: IdGenerator::new("comment"),
        }
    }

    /// Handle a decoded `POST_COMMENT`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad payload and a persistence error
    /// if the repository rejects the comment.
    pub async fn handle(
        &self,
        peer: &dyn Peer,
        hub: &dyn Fanout,
        event: PostComment,
    ) -> Result<(), HandlerError> {
        let post = validate_post_comment(&event)?;
        let user = author(&event.user, peer).to_string();

        let stored = StoredComment {
            id: self.ids.next_id(),
            post_id: post.as_str().to_string(),
            author_name: user,
            content: event.comment,
            created_at: now_millis(),
        };

        if let Err(e) = self.repo.create_comment(&stored).await {
            warn!(connection = %peer.id(), post = %post, error = %e, "Failed to save comment");
            return Err(e.into());
        }

        hub.subscribe_post(peer.id(), &post);

        let delivered = hub.broadcast_post(
            &post,
            &ServerEvent::PostComment {
                id: stored.id,
                post_id: stored.post_id,
                user: stored.author_name,
                comment: stored.content,
                timestamp: stored.created_at,
            },
        )?;
        debug!(connection = %peer.id(), post = %post, delivered, "Comment broadcast");
        Ok(())
    }
}
