//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

/// Whether the server still accepts connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Serving and accepting upgrades.
    Ok,
    /// Shutdown has begun; new upgrades are refused.
    ShuttingDown,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Serving state.
    pub status: HealthStatus,
    /// Whole seconds since the server started.
    pub uptime_secs: u64,
    /// Connections currently registered with the hub.
    pub connections: usize,
}

/// Build the body from the hub's live count.
pub fn health_check(started: Instant, connections: usize, shutting_down: bool) -> HealthResponse {
    let status = if shutting_down {
        HealthStatus::ShuttingDown
    } else {
        HealthStatus::Ok
    };
    HealthResponse {
        status,
        uptime_secs: started.elapsed().as_secs(),
        connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn shutdown_flips_status() {
        assert_eq!(health_check(Instant::now(), 0, false).status, HealthStatus::Ok);
        assert_eq!(
            health_check(Instant::now(), 0, true).status,
            HealthStatus::ShuttingDown
        );
    }

    #[test]
    fn uptime_counts_from_start() {
        let started = Instant::now().checked_sub(Duration::from_secs(90)).unwrap();
        assert!(health_check(started, 0, false).uptime_secs >= 89);
    }

    #[test]
    fn body_shape() {
        let body = serde_json::to_value(health_check(Instant::now(), 3, true)).unwrap();
        assert_eq!(body["status"], "shutting_down");
        assert_eq!(body["connections"], 3);
        assert!(body["uptime_secs"].is_u64());
    }
}
