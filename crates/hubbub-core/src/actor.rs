//! The per-connection actor.
//!
//! [`run_connection`] owns one transport connection for its whole life. The
//! inbound loop runs on the calling task and feeds frames to the router; the
//! outbound loop runs on its own task, draining the connection's queue and
//! sending keepalive pings. Whichever loop stops first closes the connection
//! and the registry tears it down once.

use std::sync::Arc;
use std::time::Duration;

use hubbub_protocol::limits;
use hubbub_transport::{ConnectionId, FrameSink, FrameSource, TransportError, TransportMessage};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::dispatch::EventRouter;
use crate::hub::{HubError, Registry};
use crate::traits::Peer;

/// Timing and size limits for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,
    /// Outbound queue capacity, in frames.
    pub send_queue_capacity: usize,
    /// Close the connection if no pong arrives within this window.
    pub read_timeout: Duration,
    /// Upper bound on a single transport write.
    pub write_timeout: Duration,
    /// Keepalive ping period. Must be shorter than `read_timeout`.
    pub ping_interval: Duration,
    /// Join frames queued between writes into one newline-separated frame.
    pub coalesce: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: limits::MAX_FRAME_SIZE,
            send_queue_capacity: limits::SEND_QUEUE_CAPACITY,
            read_timeout: limits::READ_TIMEOUT,
            write_timeout: limits::WRITE_TIMEOUT,
            ping_interval: limits::PING_INTERVAL,
            coalesce: false,
        }
    }
}

impl ConnectionConfig {
    /// Set the read timeout and derive the ping interval from it.
    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.ping_interval = limits::ping_interval_for(read_timeout);
        self
    }
}

/// Shared services every connection needs.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Registry,
    pub router: Arc<EventRouter>,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection or the stream ended.
    PeerClosed,
    /// No pong within the read timeout.
    ReadTimeout,
    /// The peer sent a frame over the size limit.
    FrameTooLarge { size: usize, max: usize },
    /// The transport failed while reading.
    Transport(String),
    /// Closed from our side: eviction, a failed write, or shutdown.
    Closed,
}

impl CloseReason {
    /// Short label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::ReadTimeout => "read_timeout",
            CloseReason::FrameTooLarge { .. } => "frame_too_large",
            CloseReason::Transport(_) => "transport_error",
            CloseReason::Closed => "closed",
        }
    }
}

/// Summary of a finished connection.
#[derive(Debug, Clone)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub reason: CloseReason,
    /// Data frames received.
    pub frames_in: u64,
    /// Transport writes performed, pings excluded.
    pub writes_out: u64,
}

/// Drive a connection from registration to teardown.
///
/// # Errors
///
/// Returns an error if the registry refuses the connection. The transport is
/// closed before returning in that case.
pub async fn run_connection<S, K>(
    mut source: S,
    mut sink: K,
    display_name: impl Into<String>,
    ctx: ConnectionContext,
    config: ConnectionConfig,
) -> Result<ConnectionSummary, HubError>
where
    S: FrameSource,
    K: FrameSink + 'static,
{
    let id = ConnectionId::generate();
    let (handle, queue) =
        ConnectionHandle::new(id.clone(), display_name, config.send_queue_capacity);

    if let Err(e) = ctx.registry.connect(Arc::clone(&handle)).await {
        warn!(connection = %id, error = %e, "Registration refused");
        let _ = sink.close().await;
        return Err(e);
    }
    info!(
        connection = %id,
        user = %handle.display_name(),
        remote = ?source.remote_addr(),
        "Connection established"
    );

    let writer = tokio::spawn(write_loop(
        sink,
        queue,
        Arc::clone(&handle),
        ctx.registry.clone(),
        config.clone(),
    ));

    let (reason, frames_in) = read_loop(&mut source, &handle, &ctx, &config).await;

    handle.close();
    ctx.registry.disconnect(&id).await;

    let writes_out = match writer.await {
        Ok(writes) => writes,
        Err(e) => {
            warn!(connection = %id, error = %e, "Writer task failed");
            0
        }
    };
    handle.advance(ConnectionState::Closed);

    info!(
        connection = %id,
        reason = reason.as_str(),
        frames_in,
        writes_out,
        "Connection closed"
    );
    Ok(ConnectionSummary {
        id,
        reason,
        frames_in,
        writes_out,
    })
}

async fn read_loop<S: FrameSource>(
    source: &mut S,
    handle: &Arc<ConnectionHandle>,
    ctx: &ConnectionContext,
    config: &ConnectionConfig,
) -> (CloseReason, u64) {
    let mut deadline = Instant::now() + config.read_timeout;
    let mut frames_in = 0u64;

    let reason = loop {
        let received = tokio::select! {
            biased;
            _ = handle.closed() => break CloseReason::Closed,
            received = time::timeout_at(deadline, source.recv()) => received,
        };

        let message = match received {
            Err(_) => {
                debug!(connection = %handle.id(), "Read deadline expired");
                break CloseReason::ReadTimeout;
            }
            Ok(Ok(None)) => break CloseReason::PeerClosed,
            Ok(Err(TransportError::ConnectionClosed)) => break CloseReason::PeerClosed,
            Ok(Err(e)) => break CloseReason::Transport(e.to_string()),
            Ok(Ok(Some(message))) => message,
        };

        if message.len() > config.max_frame_size {
            warn!(
                connection = %handle.id(),
                size = message.len(),
                max = config.max_frame_size,
                "Frame too large"
            );
            break CloseReason::FrameTooLarge {
                size: message.len(),
                max: config.max_frame_size,
            };
        }

        match message {
            TransportMessage::Text(text) => {
                frames_in += 1;
                dispatch(handle, ctx, text.as_bytes()).await;
            }
            TransportMessage::Binary(data) => {
                frames_in += 1;
                dispatch(handle, ctx, &data).await;
            }
            TransportMessage::Pong(_) => {
                trace!(connection = %handle.id(), "Pong");
                deadline = Instant::now() + config.read_timeout;
            }
            // Answered by the transport.
            TransportMessage::Ping(_) => {}
            TransportMessage::Close => break CloseReason::PeerClosed,
        }
    };

    (reason, frames_in)
}

async fn dispatch(handle: &Arc<ConnectionHandle>, ctx: &ConnectionContext, raw: &[u8]) {
    let Err(err) = ctx.router.route(handle.as_ref(), &ctx.registry, raw).await else {
        return;
    };

    debug!(connection = %handle.id(), kind = err.kind(), error = %err, "Event rejected");
    if let Err(e) = handle.send_direct(&err.to_event()) {
        warn!(connection = %handle.id(), error = %e, "Failed to report error to client");
    }
}

/// Returns the number of data writes performed.
async fn write_loop<K: FrameSink>(
    mut sink: K,
    mut queue: mpsc::Receiver<Arc<str>>,
    handle: Arc<ConnectionHandle>,
    registry: Registry,
    config: ConnectionConfig,
) -> u64 {
    let mut ping = time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let batch_limit = config.send_queue_capacity.max(1);
    let mut writes = 0u64;

    let failure = loop {
        tokio::select! {
            biased;
            _ = handle.closed() => break None,
            frame = queue.recv() => {
                let Some(frame) = frame else { break None };
                let result = if config.coalesce {
                    let text = coalesce(frame, &mut queue, batch_limit);
                    write(&mut sink, TransportMessage::Text(text), config.write_timeout).await
                } else {
                    write(&mut sink, TransportMessage::Text(frame.to_string()), config.write_timeout).await
                };
                if let Err(e) = result {
                    break Some(e);
                }
                writes += 1;
            }
            _ = ping.tick() => {
                trace!(connection = %handle.id(), "Ping");
                if let Err(e) = write(&mut sink, TransportMessage::Ping(Vec::new()), config.write_timeout).await {
                    break Some(e);
                }
            }
        }
    };

    if let Some(e) = failure {
        warn!(connection = %handle.id(), error = %e, "Write failed");
        handle.close();
        registry.request_disconnect(handle.id());
    }

    if time::timeout(config.write_timeout, sink.close()).await.is_err() {
        debug!(connection = %handle.id(), "Close frame timed out");
    }
    writes
}

/// Join `first` with everything already queued, up to `limit` frames.
fn coalesce(first: Arc<str>, queue: &mut mpsc::Receiver<Arc<str>>, limit: usize) -> String {
    let mut text = String::from(&*first);
    for _ in 1..limit {
        match queue.try_recv() {
            Ok(next) => {
                text.push('\n');
                text.push_str(&next);
            }
            Err(_) => break,
        }
    }
    text
}

async fn write<K: FrameSink>(
    sink: &mut K,
    message: TransportMessage,
    deadline: Duration,
) -> Result<(), TransportError> {
    match time::timeout(deadline, sink.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::RegistryConfig;
    use crate::repository::{InMemoryStore, MessageRepository};
    use hubbub_protocol::{codec, ClientEvent, ErrorCode, ServerEvent};
    use hubbub_transport::memory::{duplex, MemoryPeer};
    use tokio::task::JoinHandle;

    fn context() -> (ConnectionContext, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ConnectionContext {
            registry: Registry::spawn(RegistryConfig::default()),
            router: Arc::new(EventRouter::new(store.clone(), store.clone())),
        };
        (ctx, store)
    }

    fn start(
        ctx: &ConnectionContext,
        name: &str,
        config: ConnectionConfig,
    ) -> (MemoryPeer, JoinHandle<Result<ConnectionSummary, HubError>>) {
        let (source, sink, peer) = duplex(64);
        let task = tokio::spawn(run_connection(
            source,
            sink,
            name.to_string(),
            ctx.clone(),
            config,
        ));
        (peer, task)
    }

    async fn send(peer: &MemoryPeer, event: ClientEvent) {
        peer.send_text(codec::encode_client(&event).unwrap())
            .await
            .unwrap();
    }

    /// Next server event, skipping keepalive pings.
    async fn next_event(peer: &mut MemoryPeer) -> ServerEvent {
        loop {
            match peer.recv().await {
                Some(TransportMessage::Text(text)) => return codec::decode_server(&text).unwrap(),
                Some(TransportMessage::Ping(_)) => continue,
                other => panic!("Expected text frame, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_join_room_acknowledged() {
        let (ctx, _store) = context();
        let (mut alice, _task) = start(&ctx, "alice", ConnectionConfig::default());

        send(&alice, ClientEvent::join_room("general", "alice")).await;
        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::room_joined("general", "alice")
        );
        assert_eq!(ctx.registry.room_size("general"), 1);
    }

    #[tokio::test]
    async fn test_leave_room_stops_room_delivery() {
        let (ctx, _store) = context();
        let (mut alice, _a) = start(&ctx, "alice", ConnectionConfig::default());
        let (mut bob, _b) = start(&ctx, "bob", ConnectionConfig::default());

        for peer in [&mut alice, &mut bob] {
            send(peer, ClientEvent::join_room("general", "x")).await;
            next_event(peer).await;
        }

        send(&bob, ClientEvent::leave_room("General", "bob")).await;
        assert_eq!(
            next_event(&mut bob).await,
            ServerEvent::room_left("general", "bob")
        );
        assert_eq!(ctx.registry.room_size("general"), 1);

        send(&alice, ClientEvent::chat_message("general", "alice", "still here?")).await;
        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::ChatMessage { .. }
        ));
        assert!(bob.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_chat_reaches_room_after_persist() {
        let (ctx, store) = context();
        let (mut alice, _a) = start(&ctx, "alice", ConnectionConfig::default());
        let (mut bob, _b) = start(&ctx, "bob", ConnectionConfig::default());

        send(&alice, ClientEvent::join_room("general", "alice")).await;
        next_event(&mut alice).await;
        send(&bob, ClientEvent::join_room("general", "bob")).await;
        next_event(&mut bob).await;

        send(&alice, ClientEvent::chat_message("general", "alice", "hi")).await;

        match next_event(&mut bob).await {
            ServerEvent::ChatMessage { room, user, message, id, .. } => {
                assert_eq!(room, "general");
                assert_eq!(user, "alice");
                assert_eq!(message, "hi");

                let saved = store.recent_messages("general", 10).await.unwrap();
                assert_eq!(saved.len(), 1);
                assert_eq!(saved[0].id, id);
            }
            other => panic!("Expected chat message, got {:?}", other),
        }
        // The sender is a member too.
        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::ChatMessage { .. }
        ));
    }

    #[tokio::test]
    async fn test_bad_frames_reported_connection_stays_open() {
        let (ctx, store) = context();
        let (mut alice, _task) = start(&ctx, "alice", ConnectionConfig::default());

        alice.send_text("not json").await.unwrap();
        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::Error { code: Some(ErrorCode::InvalidFormat), .. }
        ));

        alice.send_text(r#"{"type":"SHOUT"}"#).await.unwrap();
        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::Error { code: Some(ErrorCode::UnknownEventType), .. }
        ));

        send(&alice, ClientEvent::post_comment("post 1", "alice", "nice")).await;
        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::Error { code: Some(ErrorCode::ValidationFailed), .. }
        ));
        assert_eq!(store.comment_count().await, 0);
        assert!(!ctx.registry.post_topic_exists("post 1"));

        send(&alice, ClientEvent::join_room("general", "alice")).await;
        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::RoomJoined { .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (ctx, _store) = context();
        let (mut alice, task) = start(&ctx, "alice", ConnectionConfig::default());

        alice.send_text("x".repeat(limits::MAX_FRAME_SIZE + 1)).await.unwrap();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(
            summary.reason,
            CloseReason::FrameTooLarge {
                size: limits::MAX_FRAME_SIZE + 1,
                max: limits::MAX_FRAME_SIZE
            }
        );
        assert!(!ctx.registry.is_connected(&summary.id));
        assert_eq!(alice.recv().await, Some(TransportMessage::Close));
    }

    #[tokio::test]
    async fn test_peer_hangup_tears_down_memberships() {
        let (ctx, _store) = context();
        let (mut alice, task) = start(&ctx, "alice", ConnectionConfig::default());

        send(&alice, ClientEvent::join_room("general", "alice")).await;
        next_event(&mut alice).await;
        send(&alice, ClientEvent::post_comment("post-1", "alice", "first")).await;
        next_event(&mut alice).await;
        assert_eq!(ctx.registry.stats().post_topics, 1);

        alice.close();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::PeerClosed);
        assert_eq!(summary.frames_in, 2);
        assert_eq!(ctx.registry.stats().connections, 0);
        assert!(!ctx.registry.room_exists("general"));
        assert!(!ctx.registry.post_topic_exists("post-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ping_sent() {
        let (ctx, _store) = context();
        let config = ConnectionConfig::default().with_read_timeout(Duration::from_secs(10));
        let (mut alice, _task) = start(&ctx, "alice", config);

        // Time auto-advances to the first tick at 9s.
        assert_eq!(alice.recv().await, Some(TransportMessage::Ping(Vec::new())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pong_expires_read_deadline() {
        let (ctx, _store) = context();
        let config = ConnectionConfig::default().with_read_timeout(Duration::from_secs(10));
        let (_alice, task) = start(&ctx, "alice", config);

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::ReadTimeout);
        assert_eq!(ctx.registry.stats().connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_extends_read_deadline() {
        let (ctx, _store) = context();
        let config = ConnectionConfig::default().with_read_timeout(Duration::from_secs(10));
        let (mut alice, task) = start(&ctx, "alice", config);

        for _ in 0..5 {
            assert_eq!(alice.recv().await, Some(TransportMessage::Ping(Vec::new())));
            alice.send(TransportMessage::Pong(Vec::new())).await.unwrap();
        }
        // Roughly 45s in; without the pongs the deadline would have fired at 10s.
        assert!(!task.is_finished());
        assert_eq!(ctx.registry.stats().connections, 1);

        alice.close();
        assert_eq!(task.await.unwrap().unwrap().reason, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_direct_queue_full_is_reported_not_fatal() {
        let (ctx, _store) = context();
        let (handle, _queue) = ConnectionHandle::new(ConnectionId::new("direct"), "alice", 1);
        ctx.registry.connect(handle.clone()).await.unwrap();

        let event = ServerEvent::room_joined("general", "alice");
        ctx.registry.send_direct(handle.id(), &event).unwrap();
        assert!(matches!(
            ctx.registry.send_direct(handle.id(), &event),
            Err(HubError::SendBufferFull(_))
        ));
        assert!(ctx.registry.is_connected(handle.id()));
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_saturated_member_evicted_during_broadcast() {
        let (ctx, _store) = context();
        let (mut alice, _a) = start(&ctx, "alice", ConnectionConfig::default());

        send(&alice, ClientEvent::join_room("general", "alice")).await;
        next_event(&mut alice).await;

        // A member whose writer never drains: queue of one, pre-filled.
        let (stuck, _stuck_queue) =
            ConnectionHandle::new(ConnectionId::new("stuck"), "stuck", 1);
        ctx.registry.connect(stuck.clone()).await.unwrap();
        ctx.registry
            .join_room(stuck.id(), &hubbub_protocol::RoomName::parse("general").unwrap());
        stuck.try_enqueue(Arc::from("filler")).unwrap();

        send(&alice, ClientEvent::chat_message("general", "alice", "hi")).await;
        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::ChatMessage { .. }
        ));

        assert!(stuck.is_closed());
        assert!(!ctx.registry.is_member("general", stuck.id()));
        assert!(!ctx.registry.disconnect(stuck.id()).await);
        assert!(!ctx.registry.is_connected(stuck.id()));
        assert_eq!(ctx.registry.room_size("general"), 1);
    }

    #[test]
    fn test_coalesce_joins_queued_frames_with_newline() {
        let (tx, mut queue) = mpsc::channel::<Arc<str>>(8);
        for text in ["b", "c"] {
            tx.try_send(Arc::from(text)).unwrap();
        }
        assert_eq!(coalesce(Arc::from("a"), &mut queue, 8), "a\nb\nc");

        tx.try_send(Arc::from("d")).unwrap();
        tx.try_send(Arc::from("e")).unwrap();
        assert_eq!(coalesce(Arc::from("x"), &mut queue, 2), "x\nd");
        assert_eq!(coalesce(Arc::from("y"), &mut queue, 2), "y\ne");
    }

    #[tokio::test]
    async fn test_coalescing_writer_batches_backlog() {
        let (ctx, _store) = context();
        let (_source, sink, mut peer) = duplex(8);
        let (handle, queue) = ConnectionHandle::new(ConnectionId::new("batch"), "alice", 8);
        ctx.registry.connect(handle.clone()).await.unwrap();

        // Queue before the writer starts so all three are pending at once.
        for text in ["1", "2", "3"] {
            handle.try_enqueue(Arc::from(text)).unwrap();
        }
        let config = ConnectionConfig {
            coalesce: true,
            ..ConnectionConfig::default()
        };
        let writer = tokio::spawn(write_loop(
            sink,
            queue,
            handle.clone(),
            ctx.registry.clone(),
            config,
        ));

        assert_eq!(
            peer.recv().await,
            Some(TransportMessage::Text("1\n2\n3".to_string()))
        );
        handle.close();
        assert_eq!(writer.await.unwrap(), 1);
        assert_eq!(peer.recv().await, Some(TransportMessage::Close));
    }
}
