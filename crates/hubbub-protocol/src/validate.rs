//! Payload validation.
//!
//! Validators are pure: they inspect a decoded payload and either return the
//! typed key the hub should use (a [`RoomName`] or [`PostId`]) or a
//! [`ValidationError`] naming the offending field. No side effects happen
//! before a payload has passed its validator.

use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

use crate::events::{ChatMessage, JoinRoom, LeaveRoom, PostComment};

/// Minimum room name length for `JOIN_ROOM`.
pub const ROOM_NAME_MIN_LENGTH: usize = 2;

/// Maximum room name length for `JOIN_ROOM`.
pub const ROOM_NAME_MAX_LENGTH: usize = 30;

/// Maximum room name length accepted on `CHAT_MESSAGE`.
pub const CHAT_ROOM_MAX_LENGTH: usize = 50;

/// Maximum chat message length.
pub const MESSAGE_MAX_LENGTH: usize = 1000;

/// Maximum post ID length.
pub const POST_ID_MAX_LENGTH: usize = 100;

/// Maximum comment length.
pub const COMMENT_MAX_LENGTH: usize = 2000;

/// Room names nobody may join.
pub const RESERVED_ROOM_NAMES: &[&str] = &["admin", "system", "private"];

/// A field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation error on field '{field}': {message}")]
pub struct ValidationError {
    /// Offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error.
    #[must_use]
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// `[A-Za-z0-9_-]+`
fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

/// A validated, case-folded room name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomName(String);

impl RoomName {
    /// Parse a room name as addressed by a chat message or a history query.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, longer than
    /// [`CHAT_ROOM_MAX_LENGTH`], or contains characters outside `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::new("room", "room name is required"));
        }
        if char_len(raw) > CHAT_ROOM_MAX_LENGTH {
            return Err(ValidationError::new(
                "room",
                format!("room name too long (max {CHAT_ROOM_MAX_LENGTH} characters)"),
            ));
        }
        if !is_identifier(raw) {
            return Err(ValidationError::new(
                "room",
                "invalid room name format (only alphanumeric, dash, underscore allowed)",
            ));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RoomName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A validated post identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostId(String);

impl PostId {
    /// Parse a post identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is empty, longer than
    /// [`POST_ID_MAX_LENGTH`], or contains characters outside `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::new(
                "post_id",
                "post_id is required for comment",
            ));
        }
        if char_len(raw) > POST_ID_MAX_LENGTH {
            return Err(ValidationError::new(
                "post_id",
                format!("post_id too long (max {POST_ID_MAX_LENGTH} characters)"),
            ));
        }
        if !is_identifier(raw) {
            return Err(ValidationError::new(
                "post_id",
                "invalid post_id format (only alphanumeric, dash, underscore allowed)",
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PostId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Validate a `JOIN_ROOM` payload.
///
/// The room name is trimmed and case-folded before the length, character set
/// and reserved-name checks.
///
/// # Errors
///
/// Returns the first failing field.
pub fn validate_join_room(event: &JoinRoom) -> Result<RoomName, ValidationError> {
    if event.room.is_empty() {
        return Err(ValidationError::new("room", "room name is required"));
    }

    let normalized = event.room.trim().to_ascii_lowercase();
    let len = char_len(&normalized);

    if len < ROOM_NAME_MIN_LENGTH {
        return Err(ValidationError::new(
            "room",
            format!("room name too short (min {ROOM_NAME_MIN_LENGTH} characters)"),
        ));
    }
    if len > ROOM_NAME_MAX_LENGTH {
        return Err(ValidationError::new(
            "room",
            format!("room name too long (max {ROOM_NAME_MAX_LENGTH} characters)"),
        ));
    }
    if !is_identifier(&normalized) {
        return Err(ValidationError::new(
            "room",
            "invalid room name format (only alphanumeric, dash, underscore allowed)",
        ));
    }
    if RESERVED_ROOM_NAMES.contains(&normalized.as_str()) {
        return Err(ValidationError::new(
            "room",
            format!("room name '{normalized}' is reserved"),
        ));
    }

    Ok(RoomName(normalized))
}

/// Validate a `LEAVE_ROOM` payload.
///
/// Leaving uses the room rules of chat messages after trimming, so any room
/// a connection can be in can also be left.
///
/// # Errors
///
/// Returns an error on the `room` field.
pub fn validate_leave_room(event: &LeaveRoom) -> Result<RoomName, ValidationError> {
    RoomName::parse(event.room.trim())
}

/// Validate a `CHAT_MESSAGE` payload.
///
/// # Errors
///
/// Returns the first failing field.
pub fn validate_chat_message(event: &ChatMessage) -> Result<RoomName, ValidationError> {
    if event.room.is_empty() {
        return Err(ValidationError::new(
            "room",
            "room name is required for chat message",
        ));
    }
    if event.message.is_empty() {
        return Err(ValidationError::new("message", "message content is required"));
    }
    if char_len(&event.message) > MESSAGE_MAX_LENGTH {
        return Err(ValidationError::new(
            "message",
            format!("message too long (max {MESSAGE_MAX_LENGTH} characters)"),
        ));
    }
    RoomName::parse(&event.room)
}

/// Validate a `POST_COMMENT` payload.
///
/// # Errors
///
/// Returns the first failing field.
pub fn validate_post_comment(event: &PostComment) -> Result<PostId, ValidationError> {
    if event.post_id.is_empty() {
        return Err(ValidationError::new(
            "post_id",
            "post_id is required for comment",
        ));
    }
    if event.comment.is_empty() {
        return Err(ValidationError::new("comment", "comment content is required"));
    }
    if char_len(&event.comment) > COMMENT_MAX_LENGTH {
        return Err(ValidationError::new(
            "comment",
            format!("comment too long (max {COMMENT_MAX_LENGTH} characters)"),
        ));
    }
    PostId::parse(&event.post_id)
}
