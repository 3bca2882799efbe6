//! `JOIN_ROOM` and `LEAVE_ROOM` handler.

use hubbub_protocol::events::{JoinRoom, LeaveRoom};
use hubbub_protocol::validate::{validate_join_room, validate_leave_room};
use hubbub_protocol::ServerEvent;
use tracing::debug;

use super::HandlerError;
use crate::traits::{Fanout, Peer};

/// Adds the sender to a room and acknowledges with `ROOM_JOINED`, or takes
/// it out again and acknowledges with `ROOM_LEFT`.
#[derive(Debug, Default)]
pub struct RoomHandler;

impl RoomHandler {
    /// Create the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Handle a decoded `JOIN_ROOM`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad room name and
    /// [`HandlerError::SendBufferFull`] if the acknowledgement cannot be
    /// queued.
    pub fn handle(
        &self,
        peer: &dyn Peer,
        hub: &dyn Fanout,
        event: JoinRoom,
    ) -> Result<(), HandlerError> {
        let room = validate_join_room(&event)?;

        if !hub.join_room(peer.id(), &room) {
            debug!(connection = %peer.id(), room = %room, "Already a member or connection closing");
        }

        hub.send_direct(
            peer.id(),
            &ServerEvent::room_joined(room.as_str(), peer.display_name()),
        )?;
        Ok(())
    }

    /// Handle a decoded `LEAVE_ROOM`.
    ///
    /// Leaving a room the sender is not in still acknowledges.
    ///
    /// # Errors
    ///
    /// Same as [`RoomHandler::handle`].
    pub fn leave(
        &self,
        peer: &dyn Peer,
        hub: &dyn Fanout,
        event: LeaveRoom,
    ) -> Result<(), HandlerError> {
        let room = validate_leave_room(&event)?;

        if !hub.leave_room(peer.id(), &room) {
            debug!(connection = %peer.id(), room = %room, "Leave for a room the connection is not in");
        }

        hub.send_direct(
            peer.id(),
            &ServerEvent::room_left(room.as_str(), peer.display_name()),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{Effect, FakeHub, FakePeer};
    use std::sync::{Arc, Mutex};

    fn join(room: &str, user: &str) -> JoinRoom {
        JoinRoom {
            room: room.to_string(),
            user: user.to_string(),
        }
    }

    #[test]
    fn test_join_acknowledges_with_display_name() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hub = FakeHub::new(log.clone());
        let peer = FakePeer::new("alice");

        RoomHandler::new()
            .handle(&peer, &hub, join("General", "someone-else"))
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Effect::Joined("general".into()),
                Effect::Direct(peer.id.clone(), ServerEvent::room_joined("general", "alice")),
            ]
        );
    }

    #[test]
    fn test_reserved_room_has_no_effect() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hub = FakeHub::new(log.clone());
        let peer = FakePeer::new("alice");

        let err = RoomHandler::new()
            .handle(&peer, &hub, join("admin", "alice"))
            .unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_leave_acknowledges_with_room_left() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hub = FakeHub::new(log.clone());
        let peer = FakePeer::new("alice");

        RoomHandler::new()
            .leave(
                &peer,
                &hub,
                LeaveRoom {
                    room: " General".to_string(),
                    user: String::new(),
                },
            )
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Effect::Left("general".into()),
                Effect::Direct(peer.id.clone(), ServerEvent::room_left("general", "alice")),
            ]
        );
    }

    #[test]
    fn test_leave_with_bad_room_has_no_effect() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hub = FakeHub::new(log.clone());
        let peer = FakePeer::new("alice");

        let err = RoomHandler::new()
            .leave(&peer, &hub, LeaveRoom::default())
            .unwrap_err();
        assert!(matches!(err, HandlerError::Validation(ref v) if v.field == "room"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_full_queue_ack_is_reported() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hub = FakeHub::new(log.clone());
        hub.direct_full = true;
        let peer = FakePeer::new("alice");

        let err = RoomHandler::new()
            .handle(&peer, &hub, join("general", "alice"))
            .unwrap_err();
        assert!(matches!(err, HandlerError::SendBufferFull(_)));
        assert_eq!(*log.lock().unwrap(), vec![Effect::Joined("general".into())]);
    }
}
