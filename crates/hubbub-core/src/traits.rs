//! The two narrow seams between handlers, connections and the hub.
//!
//! Handlers never see a concrete connection or the registry's maps. They get
//! a [`Peer`] for the connection that sent the event and a [`Fanout`] for
//! everything that touches other connections.

use hubbub_protocol::{PostId, RoomName, ServerEvent};
use hubbub_transport::ConnectionId;

use crate::hub::HubError;

/// What a handler may do with the connection that sent the event.
pub trait Peer: Send + Sync {
    /// Connection identifier.
    fn id(&self) -> &ConnectionId;

    /// Display name given at handshake time.
    fn display_name(&self) -> &str;

    /// Enqueue an event for this connection without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::SendBufferFull`] if the outbound queue is full and
    /// [`HubError::ConnectionClosed`] if the connection is shutting down.
    fn send_direct(&self, event: &ServerEvent) -> Result<(), HubError>;
}

/// What a handler may do with the hub.
pub trait Fanout: Send + Sync {
    /// Add a connection to a room. Returns `true` if it was newly added.
    fn join_room(&self, id: &ConnectionId, room: &RoomName) -> bool;

    /// Remove a connection from a room. Returns `true` if it was a member.
    fn leave_room(&self, id: &ConnectionId, room: &RoomName) -> bool;

    /// Subscribe a connection to a post's comments. Returns `true` if newly
    /// subscribed.
    fn subscribe_post(&self, id: &ConnectionId, post: &PostId) -> bool;

    /// Deliver an event to every member of a room.
    ///
    /// Returns the number of members the event was enqueued for.
    ///
    /// # Errors
    ///
    /// Returns an error only if the event cannot be encoded. Slow members are
    /// evicted rather than reported.
    fn broadcast_room(&self, room: &RoomName, event: &ServerEvent) -> Result<usize, HubError>;

    /// Deliver an event to every subscriber of a post.
    ///
    /// # Errors
    ///
    /// See [`Fanout::broadcast_room`].
    fn broadcast_post(&self, post: &PostId, event: &ServerEvent) -> Result<usize, HubError>;

    /// Enqueue an event for a single connection without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotConnected`] for unknown connections and
    /// [`HubError::SendBufferFull`] if the target's queue is full. The target
    /// is not disconnected.
    fn send_direct(&self, id: &ConnectionId, event: &ServerEvent) -> Result<(), HubError>;
}
