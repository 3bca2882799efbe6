//! Persistence seam used by the event handlers.
//!
//! Handlers depend only on [`MessageRepository`] and [`CommentRepository`].
//! [`InMemoryStore`] implements both and is what the server wires in; a
//! database-backed store slots in behind the same traits.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Backing store could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Store refused the write.
    #[error("failed to save {entity}: {reason}")]
    Rejected {
        entity: &'static str,
        reason: String,
    },
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub username: String,
    pub content: String,
    pub room_id: String,
    /// Message kind, `"chat"` for user messages.
    #[serde(rename = "type")]
    pub kind: String,
    /// Unix milliseconds.
    pub timestamp: u64,
}

/// A persisted post comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredComment {
    pub id: String,
    pub post_id: String,
    pub author_name: String,
    pub content: String,
    /// Unix milliseconds.
    pub created_at: u64,
}

/// Storage for chat messages.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist a message.
    async fn save_message(&self, message: &StoredMessage) -> Result<(), RepositoryError>;

    /// The latest `limit` messages of a room, oldest first.
    async fn recent_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, RepositoryError>;
}

/// Storage for post comments.
#[async_trait]
pub trait CommentRepository: Send + Sync {
    /// Persist a comment.
    async fn create_comment(&self, comment: &StoredComment) -> Result<(), RepositoryError>;

    /// The latest `limit` comments of a post, oldest first.
    async fn comments_for_post(
        &self,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredComment>, RepositoryError>;
}

/// Entries kept per room and per post by [`InMemoryStore::new`].
pub const DEFAULT_RETENTION: usize = 1000;

/// Process-local store for messages and comments.
///
/// Each room and each post keeps at most `retention` entries; saving past
/// that drops the oldest. The number of rooms and posts tracked is not
/// bounded, so memory grows with the number of distinct keys written.
#[derive(Debug)]
pub struct InMemoryStore {
    retention: usize,
    messages: RwLock<HashMap<String, VecDeque<StoredMessage>>>,
    comments: RwLock<HashMap<String, VecDeque<StoredComment>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl InMemoryStore {
    /// Create an empty store keeping [`DEFAULT_RETENTION`] entries per key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store keeping `retention` entries per room and post.
    /// A retention of zero is treated as one.
    #[must_use]
    pub fn with_retention(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            messages: RwLock::new(HashMap::new()),
            comments: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.values().map(VecDeque::len).sum()
    }

    /// Number of stored comments.
    pub async fn comment_count(&self) -> usize {
        self.comments.read().await.values().map(VecDeque::len).sum()
    }
}

/// Append `item` under `key`, refusing an ID already retained there and
/// dropping the oldest entry once `retention` is exceeded.
fn append<T: Clone>(
    map: &mut HashMap<String, VecDeque<T>>,
    key: &str,
    item: &T,
    id: impl Fn(&T) -> &str,
    entity: &'static str,
    retention: usize,
) -> Result<(), RepositoryError> {
    let entries = map.entry(key.to_string()).or_default();
    if entries.iter().any(|e| id(e) == id(item)) {
        return Err(RepositoryError::Rejected {
            entity,
            reason: format!("duplicate id {}", id(item)),
        });
    }
    entries.push_back(item.clone());
    while entries.len() > retention {
        entries.pop_front();
    }
    Ok(())
}

fn tail<T: Clone>(entries: Option<&VecDeque<T>>, limit: usize) -> Vec<T> {
    let Some(entries) = entries else {
        return Vec::new();
    };
    let skip = entries.len().saturating_sub(limit);
    entries.iter().skip(skip).cloned().collect()
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn save_message(&self, message: &StoredMessage) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        append(
            &mut messages,
            &message.room_id,
            message,
            |m| m.id.as_str(),
            "message",
            self.retention,
        )
    }

    async fn recent_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        Ok(tail(self.messages.read().await.get(room_id), limit))
    }
}

#[async_trait]
impl CommentRepository for InMemoryStore {
    async fn create_comment(&self, comment: &StoredComment) -> Result<(), RepositoryError> {
        let mut comments = self.comments.write().await;
        append(
            &mut comments,
            &comment.post_id,
            comment,
            |c| c.id.as_str(),
            "comment",
            self.retention,
        )
    }

    async fn comments_for_post(
        &self,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredComment>, RepositoryError> {
        Ok(tail(self.comments.read().await.get(post_id), limit))
    }
}
