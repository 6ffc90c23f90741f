//! `SwitchboardServer`: Axum HTTP + `WebSocket` server around a [`Hub`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_UPGRADES_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::Hub;
use crate::websocket::transport::Transport;

/// Server startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The bound listener has no local address.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection hub.
    pub hub: Hub,
    /// Listener configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// One permit per allowed connection, held for the life of its session.
    pub slots: Arc<Semaphore>,
}

/// The switchboard server.
pub struct SwitchboardServer {
    config: Arc<ServerConfig>,
    hub: Hub,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
    slots: Arc<Semaphore>,
}

impl SwitchboardServer {
    /// Create a new server around `hub`.
    pub fn new(config: ServerConfig, hub: Hub) -> Self {
        let slots = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            config: Arc::new(config),
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
            slots,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            slots: self.slots.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(&self.config.ws_path, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in the background.
    ///
    /// Returns the bound address and the serve task, which completes after
    /// [`SwitchboardServer::stop`] (or a direct cancel of the shutdown token).
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr().map_err(ServerError::LocalAddr)?;
        info!(addr = %local, ws_path = %self.config.ws_path, "switchboard listening");

        let router = self.router();
        let token = self.shutdown.listener_token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server error");
            }
        });

        Ok((local, handle))
    }

    /// Stop accepting requests, close every connection, and stop the hub.
    pub async fn stop(&self) {
        let _ = self.shutdown.begin();
        self.hub.shutdown().await;
    }

    /// Get the hub.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.connection_count().await;
    let shutting_down = state.shutdown.is_shutting_down() || state.hub.is_shut_down();
    Json(health::health_check(state.start_time, connections, shutting_down))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Socket-level size cap. Messages between the hub limit and this cap are
/// rejected by the inbound pump as `MessageTooLarge`; anything larger is cut
/// off by the WebSocket codec and surfaces as a protocol error.
const SOCKET_LIMIT_HEADROOM: usize = 64 * 1024;

fn socket_limit(max_message_size: usize) -> usize {
    max_message_size.saturating_add(SOCKET_LIMIT_HEADROOM)
}

/// GET {ws_path}: upgrade and hand the socket to the hub.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.hub.is_shut_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let Ok(slot) = state.slots.clone().try_acquire_owned() else {
        metrics::counter!(WS_UPGRADES_REJECTED_TOTAL).increment(1);
        warn!(max = state.config.max_connections, "connection limit reached, rejecting upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let hub = state.hub.clone();
    let limit = socket_limit(hub.config().max_message_size);
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            hub.serve(Transport::from_websocket(socket)).await;
            drop(slot);
        })
}
