//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup before
/// any metrics are recorded; a second call fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across crates.

/// Connections registered total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections torn down total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Broadcasts fanned out total (counter).
pub const WS_BROADCASTS_TOTAL: &str = "ws_broadcasts_total";
/// Broadcasts rejected because too many were pending (counter).
pub const WS_BROADCAST_REJECTIONS_TOTAL: &str = "ws_broadcast_rejections_total";
/// Connections closed because their send queue was full (counter).
pub const WS_QUEUE_OVERFLOWS_TOTAL: &str = "ws_queue_overflows_total";
/// Inbound frames skipped because they did not decode (counter).
pub const WS_DECODE_FAILURES_TOTAL: &str = "ws_decode_failures_total";
/// Upgrade requests refused at the connection limit (counter).
pub const WS_UPGRADES_REJECTED_TOTAL: &str = "ws_upgrades_rejected_total";
