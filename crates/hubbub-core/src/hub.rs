//! The connection registry.
//!
//! [`Registry`] owns the top-level connection table, room membership and post
//! subscriptions. Connect and disconnect are serialized through a single
//! coordinator task; joins, subscriptions and broadcasts run on the caller's
//! task against sharded maps.
//!
//! Broadcasts never block on a slow member. Each member gets a non-blocking
//! enqueue; a member whose queue is full is evicted: closed, dropped from the
//! group on the spot and handed to the coordinator for full teardown.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use hubbub_protocol::{codec, CodecError, PostId, RoomName, ServerEvent};
use hubbub_transport::ConnectionId;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionHandle, ConnectionState, EnqueueError};
use crate::group::GroupMap;
use crate::traits::{Fanout, Peer};

/// Registry errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Target connection's outbound queue is full.
    #[error("send buffer full for connection {0}")]
    SendBufferFull(ConnectionId),

    /// Target connection is closing or closed.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// Target connection is not registered.
    #[error("connection {0} is not registered")]
    NotConnected(ConnectionId),

    /// A connection with this ID is already registered.
    #[error("connection {0} is already registered")]
    AlreadyConnected(ConnectionId),

    /// Connection limit reached.
    #[error("maximum connections reached ({0})")]
    CapacityExceeded(usize),

    /// Event could not be encoded.
    #[error(transparent)]
    Encode(#[from] CodecError),

    /// The coordinator task is gone.
    #[error("registry is shut down")]
    Shutdown,
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of simultaneously registered connections.
    pub max_connections: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
        }
    }
}

/// Point-in-time registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Registered connections.
    pub connections: usize,
    /// Rooms with at least one member.
    pub rooms: usize,
    /// Post topics with at least one subscriber.
    pub post_topics: usize,
    /// Members evicted for a full queue since startup.
    pub evictions: u64,
}

/// Groups a connection belongs to, kept for teardown.
#[derive(Debug, Default)]
struct Memberships {
    rooms: HashSet<RoomName>,
    posts: HashSet<PostId>,
}

enum Command {
    Connect {
        handle: Arc<ConnectionHandle>,
        ack: oneshot::Sender<Result<(), HubError>>,
    },
    Disconnect {
        id: ConnectionId,
        ack: Option<oneshot::Sender<bool>>,
    },
}

struct Inner {
    config: RegistryConfig,
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    memberships: DashMap<ConnectionId, Memberships>,
    rooms: GroupMap<RoomName>,
    posts: GroupMap<PostId>,
    evictions: AtomicU64,
}

/// Process-wide connection registry.
///
/// Cloning is cheap; every clone talks to the same coordinator.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Registry {
    /// Create a registry and spawn its coordinator on the current runtime.
    ///
    /// The coordinator stops once every clone of the registry is dropped.
    #[must_use]
    pub fn spawn(config: RegistryConfig) -> Self {
        info!("Creating registry with config: {:?}", config);
        let inner = Arc::new(Inner {
            config,
            connections: DashMap::new(),
            memberships: DashMap::new(),
            rooms: GroupMap::new("room"),
            posts: GroupMap::new("post"),
            evictions: AtomicU64::new(0),
        });
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(coordinate(Arc::clone(&inner), rx));
        Self { inner, commands }
    }

    /// Register a connection and mark it active.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is taken, the connection limit is reached,
    /// or the coordinator is gone.
    pub async fn connect(&self, handle: Arc<ConnectionHandle>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Connect { handle, ack })
            .map_err(|_| HubError::Shutdown)?;
        done.await.map_err(|_| HubError::Shutdown)?
    }

    /// Remove a connection from the table and from every group, closing its
    /// queue. Waits for the coordinator to apply it.
    ///
    /// Returns `true` if this call removed the connection; repeated calls are
    /// no-ops returning `false`.
    pub async fn disconnect(&self, id: &ConnectionId) -> bool {
        let (ack, done) = oneshot::channel();
        let command = Command::Disconnect {
            id: id.clone(),
            ack: Some(ack),
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        done.await.unwrap_or(false)
    }

    /// Queue a disconnect without waiting for it.
    pub fn request_disconnect(&self, id: &ConnectionId) {
        let command = Command::Disconnect {
            id: id.clone(),
            ack: None,
        };
        if self.commands.send(command).is_err() {
            debug!(connection = %id, "Registry shut down, dropping disconnect request");
        }
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// Returns `true` if the connection was newly added. Unknown or closed
    /// connections are ignored.
    pub fn join_room(&self, id: &ConnectionId, room: &RoomName) -> bool {
        let Some(handle) = self.live_handle(id) else {
            return false;
        };
        // Holding the membership entry orders this join against teardown.
        let Some(mut memberships) = self.inner.memberships.get_mut(id) else {
            return false;
        };
        memberships.rooms.insert(room.clone());
        self.inner.rooms.insert(room, &handle)
    }

    /// Remove a connection from a room.
    ///
    /// Returns `true` if it was a member.
    pub fn leave_room(&self, id: &ConnectionId, room: &RoomName) -> bool {
        if let Some(mut memberships) = self.inner.memberships.get_mut(id) {
            memberships.rooms.remove(room);
        }
        self.inner.rooms.remove(room, id)
    }

    /// Subscribe a connection to a post's comments.
    ///
    /// Returns `true` if the connection was newly subscribed.
    pub fn subscribe_post(&self, id: &ConnectionId, post: &PostId) -> bool {
        let Some(handle) = self.live_handle(id) else {
            return false;
        };
        let Some(mut memberships) = self.inner.memberships.get_mut(id) else {
            return false;
        };
        memberships.posts.insert(post.clone());
        self.inner.posts.insert(post, &handle)
    }

    /// Broadcast an event to a room.
    ///
    /// # Errors
    ///
    /// Returns an error only if the event cannot be encoded.
    pub fn broadcast_room(&self, room: &RoomName, event: &ServerEvent) -> Result<usize, HubError> {
        let frame = codec::encode(event)?;
        Ok(self.broadcast_room_frame(room, frame))
    }

    /// Broadcast an already-encoded frame to a room.
    pub fn broadcast_room_frame(&self, room: &RoomName, frame: Arc<str>) -> usize {
        self.fan_out(&self.inner.rooms, room, frame)
    }

    /// Broadcast an event to a post's subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error only if the event cannot be encoded.
    pub fn broadcast_post(&self, post: &PostId, event: &ServerEvent) -> Result<usize, HubError> {
        let frame = codec::encode(event)?;
        Ok(self.fan_out(&self.inner.posts, post, frame))
    }

    /// Send an event to one connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotConnected`] for unknown connections and
    /// [`HubError::SendBufferFull`] if its queue is full.
    pub fn send_direct(&self, id: &ConnectionId, event: &ServerEvent) -> Result<(), HubError> {
        let handle = self
            .inner
            .connections
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HubError::NotConnected(id.clone()))?;
        Peer::send_direct(handle.as_ref(), event)
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.inner.connections.len(),
            rooms: self.inner.rooms.len(),
            post_topics: self.inner.posts.len(),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.inner.connections.contains_key(id)
    }

    /// IDs of a room's current members.
    #[must_use]
    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.inner
            .rooms
            .members(room)
            .iter()
            .map(|h| h.id().clone())
            .collect()
    }

    /// Whether a connection is in a room.
    #[must_use]
    pub fn is_member(&self, room: &str, id: &ConnectionId) -> bool {
        self.inner.rooms.contains(room, id)
    }

    /// Number of members in a room.
    #[must_use]
    pub fn room_size(&self, room: &str) -> usize {
        self.inner.rooms.member_count(room)
    }

    /// Whether a room currently exists.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.inner.rooms.exists(room)
    }

    /// Number of subscribers of a post.
    #[must_use]
    pub fn subscriber_count(&self, post: &str) -> usize {
        self.inner.posts.member_count(post)
    }

    /// Whether a connection is subscribed to a post.
    #[must_use]
    pub fn is_subscribed(&self, post: &str, id: &ConnectionId) -> bool {
        self.inner.posts.contains(post, id)
    }

    /// Whether a post topic currently exists.
    #[must_use]
    pub fn post_topic_exists(&self, post: &str) -> bool {
        self.inner.posts.exists(post)
    }

    fn live_handle(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.inner
            .connections
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|handle| !handle.is_closed())
    }

    fn fan_out<K>(&self, groups: &GroupMap<K>, key: &K, frame: Arc<str>) -> usize
    where
        K: Eq + std::hash::Hash + Clone + std::fmt::Display,
    {
        let members = groups.members(key);
        if members.is_empty() {
            trace!(group = %key, "Broadcast to empty group");
            return 0;
        }

        let mut delivered = 0;
        for handle in &members {
            match handle.try_enqueue(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(reason) => {
                    groups.remove(key, handle.id());
                    self.evict(handle, reason);
                }
            }
        }

        trace!(group = %key, members = members.len(), delivered, "Broadcast");
        delivered
    }

    fn evict(&self, handle: &ConnectionHandle, reason: EnqueueError) {
        if handle.close() {
            self.inner.evictions.fetch_add(1, Ordering::Relaxed);
            warn!(
                connection = %handle.id(),
                reason = ?reason,
                queued = handle.queued(),
                "Evicting unresponsive connection"
            );
        }
        self.request_disconnect(handle.id());
    }
}

impl Fanout for Registry {
    fn join_room(&self, id: &ConnectionId, room: &RoomName) -> bool {
        Registry::join_room(self, id, room)
    }

    fn leave_room(&self, id: &ConnectionId, room: &RoomName) -> bool {
        Registry::leave_room(self, id, room)
    }

    fn subscribe_post(&self, id: &ConnectionId, post: &PostId) -> bool {
        Registry::subscribe_post(self, id, post)
    }

    fn broadcast_room(&self, room: &RoomName, event: &ServerEvent) -> Result<usize, HubError> {
        Registry::broadcast_room(self, room, event)
    }

    fn broadcast_post(&self, post: &PostId, event: &ServerEvent) -> Result<usize, HubError> {
        Registry::broadcast_post(self, post, event)
    }

    fn send_direct(&self, id: &ConnectionId, event: &ServerEvent) -> Result<(), HubError> {
        Registry::send_direct(self, id, event)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("stats", &self.stats())
            .finish()
    }
}

async fn coordinate(inner: Arc<Inner>, mut commands: mpsc::UnboundedReceiver<Command>) {
    debug!("Registry coordinator started");
    while let Some(command) = commands.recv().await {
        match command {
            Command::Connect { handle, ack } => {
                let _ = ack.send(register(&inner, handle));
            }
            Command::Disconnect { id, ack } => {
                let removed = teardown(&inner, &id);
                if let Some(ack) = ack {
                    let _ = ack.send(removed);
                }
            }
        }
    }
    debug!("Registry coordinator stopped");
}

fn register(inner: &Inner, handle: Arc<ConnectionHandle>) -> Result<(), HubError> {
    let id = handle.id().clone();
    if inner.connections.contains_key(&id) {
        return Err(HubError::AlreadyConnected(id));
    }
    if inner.connections.len() >= inner.config.max_connections {
        warn!(connection = %id, limit = inner.config.max_connections, "Connection limit reached");
        return Err(HubError::CapacityExceeded(inner.config.max_connections));
    }
    if handle.is_closed() {
        return Err(HubError::ConnectionClosed(id));
    }

    handle.advance(ConnectionState::Active);
    inner.memberships.insert(id.clone(), Memberships::default());
    inner.connections.insert(id.clone(), handle);
    info!(connection = %id, total = inner.connections.len(), "Connection registered");
    Ok(())
}

fn teardown(inner: &Inner, id: &ConnectionId) -> bool {
    let Some((_, handle)) = inner.connections.remove(id) else {
        trace!(connection = %id, "Disconnect for unknown connection ignored");
        return false;
    };
    handle.close();

    if let Some((_, memberships)) = inner.memberships.remove(id) {
        for room in &memberships.rooms {
            inner.rooms.remove(room, id);
        }
        for post in &memberships.posts {
            inner.posts.remove(post, id);
        }
    }

    info!(connection = %id, total = inner.connections.len(), "Connection unregistered");
    true
}
