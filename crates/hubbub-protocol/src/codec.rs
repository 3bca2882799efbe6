//! JSON codec for hubbub envelopes.
//!
//! Inbound frames are decoded lazily: [`peek_kind`] reads only the
//! discriminator so unknown or malformed frames are rejected before any
//! payload-specific work happens. Outbound events are serialized once into a
//! shared buffer so a broadcast can hand the same bytes to every member.

use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;

use crate::events::{ClientEvent, EventKind, ServerEvent};

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame is not a JSON object or has no usable discriminator.
    #[error("invalid event format: {0}")]
    InvalidFormat(String),

    /// Discriminator does not name a known event kind.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Discriminator is known but the payload does not decode.
    #[error("invalid {kind} event: {source}")]
    InvalidPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },

    /// Serialization of an outbound event failed.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct Discriminator<'a> {
    #[serde(rename = "type", borrow, default)]
    kind: Option<Cow<'a, str>>,
}

/// Read only the discriminator of a raw frame.
///
/// # Errors
///
/// Returns [`CodecError::InvalidFormat`] if the frame is not a JSON object or
/// lacks a string `type` field, and [`CodecError::UnknownEventType`] if the
/// discriminator names no known kind.
pub fn peek_kind(raw: &[u8]) -> Result<EventKind, CodecError> {
    let first = raw.iter().copied().find(|b| !b.is_ascii_whitespace());
    if first != Some(b'{') {
        return Err(CodecError::InvalidFormat("expected a JSON object".into()));
    }

    let discriminator: Discriminator<'_> =
        serde_json::from_slice(raw).map_err(|e| CodecError::InvalidFormat(e.to_string()))?;

    let name = discriminator
        .kind
        .ok_or_else(|| CodecError::InvalidFormat("missing \"type\" field".into()))?;

    EventKind::from_name(&name).ok_or_else(|| CodecError::UnknownEventType(name.into_owned()))
}

/// Decode the full payload of a frame whose kind is already known.
///
/// # Errors
///
/// Returns [`CodecError::InvalidPayload`] if the payload does not match the
/// shape of `T`.
pub fn decode<'a, T: Deserialize<'a>>(kind: EventKind, raw: &'a [u8]) -> Result<T, CodecError> {
    serde_json::from_slice(raw).map_err(|source| CodecError::InvalidPayload { kind, source })
}

/// Serialize a server event once for fan-out.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<Arc<str>, CodecError> {
    serde_json::to_string(event)
        .map(Arc::from)
        .map_err(CodecError::Encode)
}

/// Serialize a client event (used by clients and tests).
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(CodecError::Encode)
}

/// Decode a server event (used by clients and tests).
///
/// # Errors
///
/// Returns an error if the text is not a valid server event.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::InvalidFormat(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChatMessage, ErrorCode};

    #[test]
    fn test_peek_known_kinds() {
        let raw = br#"{"type":"CHAT_MESSAGE","room":"general","user":"alice","message":"hi"}"#;
        assert_eq!(peek_kind(raw).unwrap(), EventKind::ChatMessage);

        let raw = br#"  {"room":"general","type":"JOIN_ROOM"}"#;
        assert_eq!(peek_kind(raw).unwrap(), EventKind::JoinRoom);
    }

    #[test]
    fn test_peek_rejects_non_objects() {
        let cases: [&[u8]; 4] = [b"not json", b"[\"JOIN_ROOM\"]", b"\"JOIN_ROOM\"", b""];
        for raw in cases {
            assert!(
                matches!(peek_kind(raw), Err(CodecError::InvalidFormat(_))),
                "accepted {:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_peek_missing_or_non_string_type() {
        assert!(matches!(
            peek_kind(br#"{"room":"general"}"#),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(
            peek_kind(br#"{"type":42}"#),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_peek_unknown_type() {
        match peek_kind(br#"{"type":"TYPING"}"#) {
            Err(CodecError::UnknownEventType(name)) => assert_eq!(name, "TYPING"),
            other => panic!("Expected UnknownEventType, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_message() {
        let err = peek_kind(br#"{"type":"PING"}"#).unwrap_err();
        assert_eq!(err.to_string(), "unknown event type: PING");
    }

    #[test]
    fn test_decode_payload_type_mismatch() {
        let raw = br#"{"type":"CHAT_MESSAGE","room":5}"#;
        match decode::<ChatMessage>(EventKind::ChatMessage, raw) {
            Err(CodecError::InvalidPayload { kind, .. }) => assert_eq!(kind, EventKind::ChatMessage),
            other => panic!("Expected InvalidPayload, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_server_event() {
        let encoded = encode(&ServerEvent::error_with_code(
            "send buffer full",
            ErrorCode::SendBufferFull,
        ))
        .unwrap();
        let decoded = decode_server(&encoded).unwrap();
        assert_eq!(
            decoded,
            ServerEvent::error_with_code("send buffer full", ErrorCode::SendBufferFull)
        );
    }

    #[test]
    fn test_client_encoding_is_routable() {
        let text = encode_client(&ClientEvent::join_room("general", "alice")).unwrap();
        assert_eq!(peek_kind(text.as_bytes()).unwrap(), EventKind::JoinRoom);
    }
}
