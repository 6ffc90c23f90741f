//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON files are accepted and missing fields keep their defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "hub": { "sendQueueCapacity": 128 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Connection hub tuning.
    pub hub: HubSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl SwitchboardSettings {
    /// Reject combinations that would make the hub misbehave.
    pub fn validate(&self) -> Result<()> {
        let hub = &self.hub;
        if hub.send_queue_capacity == 0 {
            return Err(SettingsError::invalid("hub.sendQueueCapacity", "must be greater than 0"));
        }
        if hub.broadcast_queue_capacity == 0 {
            return Err(SettingsError::invalid(
                "hub.broadcastQueueCapacity",
                "must be greater than 0",
            ));
        }
        if hub.max_batch == 0 {
            return Err(SettingsError::invalid("hub.maxBatch", "must be greater than 0"));
        }
        if hub.write_timeout_ms == 0 {
            return Err(SettingsError::invalid("hub.writeTimeoutMs", "must be greater than 0"));
        }
        // A ping must go out before the peer's read deadline expires.
        if hub.keepalive_interval_ms == 0 || hub.keepalive_interval_ms >= hub.read_timeout_ms {
            return Err(SettingsError::invalid(
                "hub.keepaliveIntervalMs",
                format!(
                    "{} must be between 1 and hub.readTimeoutMs ({})",
                    hub.keepalive_interval_ms, hub.read_timeout_ms
                ),
            ));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(SettingsError::invalid(
                "server.wsPath",
                format!("must start with '/': {}", self.server.ws_path),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Route that accepts WebSocket upgrades.
    pub ws_path: String,
    /// Upgrade requests beyond this many live connections get `503`.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            max_connections: 1024,
        }
    }
}

/// Connection hub tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Per-connection outbound queue capacity (messages).
    pub send_queue_capacity: usize,
    /// Broadcasts that may be pending in the coordination loop.
    pub broadcast_queue_capacity: usize,
    /// Interval between keepalive pings in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Read deadline in milliseconds, refreshed by every inbound frame.
    pub read_timeout_ms: u64,
    /// Write deadline in milliseconds.
    pub write_timeout_ms: u64,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Maximum queued messages flushed in one write.
    pub max_batch: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            broadcast_queue_capacity: 1024,
            keepalive_interval_ms: 54_000,
            read_timeout_ms: 60_000,
            write_timeout_ms: 10_000,
            max_message_size: 512,
            max_batch: 64,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        SwitchboardSettings::default().validate().unwrap();
    }

    #[test]
    fn default_hub_values() {
        let hub = HubSettings::default();
        assert_eq!(hub.send_queue_capacity, 256);
        assert_eq!(hub.keepalive_interval_ms, 54_000);
        assert_eq!(hub.read_timeout_ms, 60_000);
        assert_eq!(hub.write_timeout_ms, 10_000);
        assert_eq!(hub.max_message_size, 512);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(SwitchboardSettings::default()).unwrap();
        assert_eq!(json["server"]["wsPath"], "/ws");
        assert_eq!(json["hub"]["sendQueueCapacity"], 256);
        assert_eq!(json["logging"]["json"], false);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: SwitchboardSettings =
            serde_json::from_str(r#"{"hub":{"sendQueueCapacity":8}}"#).unwrap();
        assert_eq!(settings.hub.send_queue_capacity, 8);
        assert_eq!(settings.hub.read_timeout_ms, 60_000);
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let mut settings = SwitchboardSettings::default();
        settings.hub.send_queue_capacity = 0;
        assert_matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                field: "hub.sendQueueCapacity",
                ..
            })
        );
    }

    #[test]
    fn keepalive_must_precede_read_deadline() {
        let mut settings = SwitchboardSettings::default();
        settings.hub.keepalive_interval_ms = 60_000;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("keepaliveIntervalMs"));
    }

    #[test]
    fn ws_path_needs_leading_slash() {
        let mut settings = SwitchboardSettings::default();
        settings.server.ws_path = "ws".into();
        assert_matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                field: "server.wsPath",
                ..
            })
        );
    }
}
