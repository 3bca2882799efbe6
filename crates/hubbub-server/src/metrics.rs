//! Metrics collection and export for hubbub.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Transport traffic is counted by wrapping each
//! connection's halves in [`MeteredSource`] and [`MeteredSink`].

use async_trait::async_trait;
use hubbub_core::{CloseReason, Registry};
use hubbub_transport::{FrameSink, FrameSource, TransportError, TransportMessage};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "hubbub_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "hubbub_connections_active";
    pub const MESSAGES_TOTAL: &str = "hubbub_messages_total";
    pub const MESSAGES_BYTES: &str = "hubbub_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "hubbub_rooms_active";
    pub const POST_TOPICS_ACTIVE: &str = "hubbub_post_topics_active";
    pub const EVICTIONS_TOTAL: &str = "hubbub_evictions_total";
    pub const LATENCY_SECONDS: &str = "hubbub_latency_seconds";
    pub const ERRORS_TOTAL: &str = "hubbub_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames moved");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames moved");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one member");
    metrics::describe_gauge!(
        names::POST_TOPICS_ACTIVE,
        "Post topics with at least one subscriber"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections dropped because their send queue was full"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record frame handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Record why a connection ended. Clean hangups are not errors.
pub fn record_close(reason: &CloseReason) {
    if !matches!(reason, CloseReason::PeerClosed) {
        record_error(reason.as_str());
    }
}

/// Publish registry gauges.
pub fn record_registry(registry: &Registry) {
    let stats = registry.stats();
    gauge!(names::ROOMS_ACTIVE).set(stats.rooms as f64);
    gauge!(names::POST_TOPICS_ACTIVE).set(stats.post_topics as f64);
    counter!(names::EVICTIONS_TOTAL).absolute(stats.evictions);
}

/// Refresh registry gauges every `interval` until the task is aborted.
pub fn spawn_stats_reporter(registry: Registry, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            record_registry(&registry);
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// Counts inbound frames and times how long each data frame takes to handle.
///
/// Handling time is measured from the moment a data frame is returned to the
/// moment the caller asks for the next one.
pub struct MeteredSource<S> {
    inner: S,
    handed_out: Option<Instant>,
}

impl<S> MeteredSource<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            handed_out: None,
        }
    }
}

#[async_trait]
impl<S: FrameSource> FrameSource for MeteredSource<S> {
    async fn recv(&mut self) -> Result<Option<TransportMessage>, TransportError> {
        if let Some(started) = self.handed_out.take() {
            record_latency(started.elapsed().as_secs_f64());
        }

        let result = self.inner.recv().await;
        match &result {
            Ok(Some(msg)) if msg.is_data() => {
                record_message(msg.len(), "inbound");
                self.handed_out = Some(Instant::now());
            }
            Ok(_) => {}
            Err(_) => record_error("transport_receive"),
        }
        result
    }

    fn remote_addr(&self) -> Option<String> {
        self.inner.remote_addr()
    }
}

/// Counts outbound frames.
pub struct MeteredSink<K> {
    inner: K,
}

impl<K> MeteredSink<K> {
    /// Wrap `inner`.
    pub fn new(inner: K) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<K: FrameSink> FrameSink for MeteredSink<K> {
    async fn send(&mut self, message: TransportMessage) -> Result<(), TransportError> {
        let bytes = message.len();
        let data = message.is_data();
        let result = self.inner.send(message).await;
        match &result {
            Ok(()) if data => record_message(bytes, "outbound"),
            Ok(()) => {}
            Err(_) => record_error("transport_send"),
        }
        result
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}
