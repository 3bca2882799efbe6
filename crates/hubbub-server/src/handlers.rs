//! HTTP and WebSocket handlers for the hubbub server.
//!
//! The WebSocket route hands each upgraded socket to the connection actor.
//! The remaining routes are read-only: health, registry stats and history.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MeteredSink, MeteredSource};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hubbub_core::{
    run_connection, CommentRepository, ConnectionContext, EventRouter, InMemoryStore,
    MessageRepository, Registry,
};
use hubbub_protocol::{limits, PostId, RoomName, ValidationError};
use hubbub_transport::websocket;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Connection registry.
    pub registry: Registry,
    /// Inbound event router.
    pub router: Arc<EventRouter>,
    /// Message and comment history.
    pub store: Arc<InMemoryStore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state. Spawns the registry coordinator, so this must
    /// run inside a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::with_retention(config.limits.history_retention));
        let router = EventRouter::new(store.clone(), store.clone());

        Self {
            registry: Registry::spawn(config.registry()),
            router: Arc::new(router),
            store,
            config,
        }
    }

    fn context(&self) -> ConnectionContext {
        ConnectionContext {
            registry: self.registry.clone(),
            router: Arc::clone(&self.router),
        }
    }

    fn history_limit(&self, requested: Option<usize>) -> usize {
        let limits = &self.config.limits;
        requested
            .filter(|&n| n > 0)
            .unwrap_or(limits.history_default_limit)
            .min(limits.history_max_limit)
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to bind or stops with an I/O error.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(AppState::new(config));

    info!("hubbub server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let reporter = state.config.metrics.enabled.then(|| {
        metrics::spawn_stats_reporter(
            state.registry.clone(),
            Duration::from_millis(state.config.metrics.stats_interval_ms),
        )
    });

    let app = build_router(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    result?;
    Ok(())
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/stats", get(stats_handler))
        .route("/api/v1/rooms/:room/messages", get(room_messages_handler))
        .route("/api/v1/posts/:post_id/comments", get(post_comments_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Registry stats handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.stats())
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    username: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let display_name = params
        .username
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| limits::DEFAULT_DISPLAY_NAME.to_string());

    // Frames up to twice the limit reach the actor, which closes with a
    // frame-too-large reason. Anything bigger fails in the transport.
    let ceiling = state.config.limits.max_frame_size.saturating_mul(2);

    ws.max_message_size(ceiling)
        .max_frame_size(ceiling)
        .on_upgrade(move |socket| async move {
            let _metrics_guard = ConnectionMetricsGuard::new();
            let (source, sink) = websocket::split(socket, Some(remote.to_string()));

            let result = run_connection(
                MeteredSource::new(source),
                MeteredSink::new(sink),
                display_name,
                state.context(),
                state.config.connection(),
            )
            .await;

            match result {
                Ok(summary) => {
                    metrics::record_close(&summary.reason);
                    debug!(connection = %summary.id, reason = summary.reason.as_str(), "WebSocket finished");
                }
                Err(e) => {
                    metrics::record_error("registration");
                    warn!(remote = %remote, error = %e, "WebSocket refused");
                }
            }
        })
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

fn bad_request(err: &ValidationError) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": err.message,
            "field": err.field,
        })),
    )
        .into_response()
}

fn unavailable(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

/// Recent messages in a room, oldest first.
async fn room_messages_handler(
    Path(room): Path<String>,
    Query(params): Query<HistoryParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let room = match RoomName::parse(&room) {
        Ok(room) => room,
        Err(e) => return bad_request(&e),
    };
    let limit = state.history_limit(params.limit);

    match state.store.recent_messages(room.as_str(), limit).await {
        Ok(messages) => Json(serde_json::json!({
            "count": messages.len(),
            "messages": messages,
            "room_id": room.as_str(),
        }))
        .into_response(),
        Err(e) => {
            warn!(room = %room, error = %e, "Failed to load messages");
            unavailable(e)
        }
    }
}

/// Recent comments on a post, oldest first.
async fn post_comments_handler(
    Path(post_id): Path<String>,
    Query(params): Query<HistoryParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let post = match PostId::parse(&post_id) {
        Ok(post) => post,
        Err(e) => return bad_request(&e),
    };
    let limit = state.history_limit(params.limit);

    match state.store.comments_for_post(post.as_str(), limit).await {
        Ok(comments) => Json(serde_json::json!({
            "comments": comments,
            "count": comments.len(),
            "post_id": post.as_str(),
        }))
        .into_response(),
        Err(e) => {
            warn!(post = %post, error = %e, "Failed to load comments");
            unavailable(e)
        }
    }
}
