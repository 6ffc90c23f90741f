//! Application callbacks invoked by the hub and the inbound pump.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::HubError;

use super::connection::Connection;

/// Capability set an application plugs into the hub.
///
/// For each connection `on_connect` runs once and completes before
/// registration is reported done, and `on_disconnect` runs once after it.
/// `on_message` is awaited on the connection's inbound pump, so a slow
/// handler delays only that connection. Callbacks may freely call back into
/// the hub.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// The connection has been registered.
    async fn on_connect(&self, _conn: &Arc<Connection>) {}

    /// The connection has been torn down. Sends to it now fail.
    async fn on_disconnect(&self, _conn: &Arc<Connection>) {}

    /// A decoded inbound message.
    async fn on_message(&self, _conn: &Arc<Connection>, _msg_type: &str, _data: Value) {}

    /// A terminal failure (transport error, queue overflow) on the connection.
    async fn on_error(&self, _conn: &Arc<Connection>, _err: &HubError) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl Handler for NoopHandler {}

type ConnectionFn = Box<dyn Fn(&Arc<Connection>) + Send + Sync>;
type MessageFn = Box<dyn Fn(&Arc<Connection>, &str, Value) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&Arc<Connection>, &HubError) + Send + Sync>;

/// Handler assembled from optional synchronous closures.
///
/// ```ignore
/// let handler = CallbackHandler::new()
///     .on_message(|conn, msg_type, _| tracing::info!(%msg_type, conn_id = %conn.id(), "got message"));
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    connect: Option<ConnectionFn>,
    disconnect: Option<ConnectionFn>,
    message: Option<MessageFn>,
    error: Option<ErrorFn>,
}

impl CallbackHandler {
    /// Create a handler with no callbacks set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect callback.
    #[must_use]
    pub fn on_connect(mut self, f: impl Fn(&Arc<Connection>) + Send + Sync + 'static) -> Self {
        self.connect = Some(Box::new(f));
        self
    }

    /// Set the disconnect callback.
    #[must_use]
    pub fn on_disconnect(mut self, f: impl Fn(&Arc<Connection>) + Send + Sync + 'static) -> Self {
        self.disconnect = Some(Box::new(f));
        self
    }

    /// Set the message callback.
    #[must_use]
    pub fn on_message(
        mut self,
        f: impl Fn(&Arc<Connection>, &str, Value) + Send + Sync + 'static,
    ) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    /// Set the error callback.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&Arc<Connection>, &HubError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl Handler for CallbackHandler {
    async fn on_connect(&self, conn: &Arc<Connection>) {
        if let Some(f) = &self.connect {
            f(conn);
        }
    }

    async fn on_disconnect(&self, conn: &Arc<Connection>) {
        if let Some(f) = &self.disconnect {
            f(conn);
        }
    }

    async fn on_message(&self, conn: &Arc<Connection>, msg_type: &str, data: Value) {
        if let Some(f) = &self.message {
            f(conn, msg_type, data);
        }
    }

    async fn on_error(&self, conn: &Arc<Connection>, err: &HubError) {
        if let Some(f) = &self.error {
            f(conn, err);
        }
    }
}
