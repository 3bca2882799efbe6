//! Protocol limits and connection timing.
//!
//! These are the defaults every connection runs with unless the server
//! configuration overrides them.

use std::time::Duration;

/// Maximum size of a single inbound frame in bytes.
pub const MAX_FRAME_SIZE: usize = 1024;

/// Capacity of each connection's outbound queue.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Time allowed without a pong before the connection is dropped.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Time allowed for a single frame write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between pings. Must stay below [`READ_TIMEOUT`].
pub const PING_INTERVAL: Duration = ping_interval_for(READ_TIMEOUT);

/// Display name used when the client does not supply one on upgrade.
pub const DEFAULT_DISPLAY_NAME: &str = "anonymous";

/// Derive the ping interval from a read timeout (nine tenths of it).
#[must_use]
pub const fn ping_interval_for(read_timeout: Duration) -> Duration {
    Duration::from_millis(read_timeout.as_millis() as u64 * 9 / 10)
}
