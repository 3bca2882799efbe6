//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`HUBBUB_HOST`, `HUBBUB_PORT`)
//! - TOML configuration file (`hubbub.toml`, `/etc/hubbub/hubbub.toml`,
//!   `~/.config/hubbub/hubbub.toml`)

use anyhow::{ensure, Context, Result};
use hubbub_core::{ConnectionConfig, RegistryConfig};
use hubbub_protocol::limits;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Outbound queue capacity per connection, in frames.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// History entries returned when the request names no limit.
    #[serde(default = "default_history_limit")]
    pub history_default_limit: usize,

    /// Upper bound on history entries per request.
    #[serde(default = "default_history_max")]
    pub history_max_limit: usize,

    /// Messages kept per room and comments kept per post.
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Close a connection that has not answered a ping within this window.
    /// Pings go out at 9/10 of it.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Upper bound on a single write, in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Merge queued outbound events into one newline-separated frame.
    #[serde(default)]
    pub coalesce: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// How often registry gauges are refreshed, in milliseconds.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,
}

// Default value functions
fn default_host() -> String {
    std::env::var("HUBBUB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HUBBUB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_frame_size() -> usize {
    limits::MAX_FRAME_SIZE
}

fn default_send_queue_capacity() -> usize {
    limits::SEND_QUEUE_CAPACITY
}

fn default_history_limit() -> usize {
    20
}

fn default_history_max() -> usize {
    100
}

fn default_history_retention() -> usize {
    hubbub_core::DEFAULT_RETENTION
}

fn default_read_timeout() -> u64 {
    limits::READ_TIMEOUT.as_millis() as u64
}

fn default_write_timeout() -> u64 {
    limits::WRITE_TIMEOUT.as_millis() as u64
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_stats_interval() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
            send_queue_capacity: default_send_queue_capacity(),
            history_default_limit: default_history_limit(),
            history_max_limit: default_history_max(),
            history_retention: default_history_retention(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
            coalesce: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            stats_interval_ms: default_stats_interval(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "hubbub.toml",
            "/etc/hubbub/hubbub.toml",
            "~/.config/hubbub/hubbub.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check values that would make the server misbehave.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.limits.max_frame_size > 0, "limits.max_frame_size must be positive");
        ensure!(
            self.limits.send_queue_capacity > 0,
            "limits.send_queue_capacity must be positive"
        );
        ensure!(
            self.heartbeat.read_timeout_ms >= 10,
            "heartbeat.read_timeout_ms must be at least 10"
        );
        ensure!(
            self.heartbeat.write_timeout_ms > 0,
            "heartbeat.write_timeout_ms must be positive"
        );
        ensure!(
            self.limits.history_retention >= self.limits.history_max_limit,
            "limits.history_retention must be at least limits.history_max_limit"
        );
        ensure!(
            self.metrics.stats_interval_ms > 0,
            "metrics.stats_interval_ms must be positive"
        );
        ensure!(
            self.transport.websocket_path.starts_with('/'),
            "transport.websocket_path must start with '/'"
        );
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Per-connection limits for the connection actor.
    #[must_use]
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_frame_size: self.limits.max_frame_size,
            send_queue_capacity: self.limits.send_queue_capacity,
            write_timeout: Duration::from_millis(self.heartbeat.write_timeout_ms),
            coalesce: self.heartbeat.coalesce,
            ..ConnectionConfig::default()
        }
        .with_read_timeout(Duration::from_millis(self.heartbeat.read_timeout_ms))
    }

    /// Registry settings.
    #[must_use]
    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            max_connections: self.limits.max_connections,
        }
    }
}
