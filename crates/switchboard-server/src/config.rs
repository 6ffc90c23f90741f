//! Runtime configuration derived from [`switchboard_settings`].

use std::time::Duration;

use switchboard_settings::{HubSettings, ServerSettings};

/// Tuning for the hub and its per-connection pumps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
    /// Broadcasts that may be pending in the coordination loop before
    /// further broadcasts are rejected.
    pub broadcast_queue_capacity: usize,
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
    /// Read deadline, refreshed by every inbound frame.
    pub read_timeout: Duration,
    /// Deadline for each write (single frame or batch).
    pub write_timeout: Duration,
    /// Inbound frames larger than this terminate the connection.
    pub max_message_size: usize,
    /// Queued messages coalesced into one flush.
    pub max_batch: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from(&HubSettings::default())
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(s: &HubSettings) -> Self {
        Self {
            send_queue_capacity: s.send_queue_capacity.max(1),
            broadcast_queue_capacity: s.broadcast_queue_capacity.max(1),
            keepalive_interval: Duration::from_millis(s.keepalive_interval_ms),
            read_timeout: Duration::from_millis(s.read_timeout_ms),
            write_timeout: Duration::from_millis(s.write_timeout_ms),
            max_message_size: s.max_message_size,
            max_batch: s.max_batch.max(1),
        }
    }
}

/// HTTP listener configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Route serving `WebSocket` upgrades.
    pub ws_path: String,
    /// Upgrades are refused with `503` at this many live connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws".into(),
            max_connections: 1024,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            ws_path: s.ws_path.clone(),
            max_connections: s.max_connections,
        }
    }
}
