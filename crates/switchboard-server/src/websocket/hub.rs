//! The hub: a cloneable handle to the connection registry.
//!
//! Every registry mutation and every fan-out goes through one FIFO command
//! channel consumed by the coordinator task (see [`super::coordinator`]), so
//! the registry has a single owner and operations from one caller are applied
//! in the order they were issued.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use switchboard_core::message::encode_payload;
use switchboard_core::{ConnectionId, HubError, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc, oneshot};
use tracing::{debug, warn};

use super::connection::{Connection, OutboundQueue};
use super::coordinator::Coordinator;
use super::handler::Handler;
use super::session;
use super::transport::Transport;
use crate::config::HubConfig;
use crate::metrics::WS_BROADCAST_REJECTIONS_TOTAL;

/// Commands processed by the coordinator, in submission order.
#[derive(Debug)]
pub(crate) enum Command {
    Register {
        conn: Arc<Connection>,
        ready: oneshot::Sender<()>,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast {
        text: Arc<str>,
        /// Held until fan-out completes; bounds pending broadcasts.
        permit: OwnedSemaphorePermit,
    },
    SendTo {
        id: ConnectionId,
        text: Arc<str>,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<BTreeMap<ConnectionId, Arc<Connection>>>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;

struct HubInner {
    commands: CommandSender,
    broadcast_permits: Arc<Semaphore>,
    handler: Arc<dyn Handler>,
    config: HubConfig,
}

/// Handle to a running hub. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Start a hub. Spawns the coordinator on the current Tokio runtime.
    pub fn new(config: HubConfig, handler: Arc<dyn Handler>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(rx, handler.clone());
        drop(tokio::spawn(coordinator.run()));

        Self {
            inner: Arc::new(HubInner {
                commands,
                broadcast_permits: Arc::new(Semaphore::new(config.broadcast_queue_capacity)),
                handler,
                config,
            }),
        }
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.inner.handler
    }

    /// Whether [`Hub::shutdown`] has run (or the coordinator is gone).
    pub fn is_shut_down(&self) -> bool {
        self.inner.commands.is_closed() || self.inner.broadcast_permits.is_closed()
    }

    /// Create an unregistered connection and the receiving end of its
    /// outbound queue.
    pub fn open_connection(&self) -> (Arc<Connection>, OutboundQueue) {
        Connection::new(self.inner.config.send_queue_capacity, self.inner.commands.clone())
    }

    /// Add a connection to the registry.
    ///
    /// Returns once the connection is visible to [`Hub::connections`] and
    /// [`Handler::on_connect`] has completed. If the hub is shut down the
    /// connection is closed instead.
    pub async fn register(&self, conn: Arc<Connection>) {
        let (ready, ready_rx) = oneshot::channel();
        let submitted = self.inner.commands.send(Command::Register {
            conn: conn.clone(),
            ready,
        });
        if submitted.is_err() || ready_rx.await.is_err() {
            debug!(conn_id = %conn.id(), "hub shut down, closing connection");
            let _ = conn.close_queue();
            conn.mark_torn_down();
        }
    }

    /// Remove a connection. Idempotent; unknown IDs are ignored.
    ///
    /// Never blocks. The connection's queue is closed and
    /// [`Handler::on_disconnect`] fires once the coordinator processes the
    /// request.
    pub fn unregister(&self, id: &ConnectionId) {
        let _ = self
            .inner
            .commands
            .send(Command::Unregister { id: id.clone() });
    }

    /// Serialize once and deliver to every registered connection.
    ///
    /// Fails fast with [`HubError::Backpressure`] when too many broadcasts
    /// are already pending. A recipient whose queue is full is torn down;
    /// the others still receive the message.
    pub fn broadcast<T: Serialize + ?Sized>(&self, msg_type: &str, data: &T) -> Result<()> {
        let text: Arc<str> = encode_payload(msg_type, data)?.into();
        let permit = self
            .inner
            .broadcast_permits
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => {
                    metrics::counter!(WS_BROADCAST_REJECTIONS_TOTAL).increment(1);
                    warn!(msg_type, "broadcast queue full, rejecting broadcast");
                    HubError::Backpressure {
                        capacity: self.inner.config.broadcast_queue_capacity,
                    }
                }
                TryAcquireError::Closed => HubError::Shutdown,
            })?;
        self.submit(Command::Broadcast { text, permit })
    }

    /// Serialize and deliver to one connection.
    ///
    /// Fails with [`HubError::NotFound`] for unknown IDs and
    /// [`HubError::Overflow`] when the target's queue is full (the target is
    /// then torn down). Ordered with broadcasts issued by the same caller.
    pub async fn send_to<T: Serialize + ?Sized>(
        &self,
        id: &ConnectionId,
        msg_type: &str,
        data: &T,
    ) -> Result<()> {
        let text: Arc<str> = encode_payload(msg_type, data)?.into();
        let (reply, rx) = oneshot::channel();
        self.submit(Command::SendTo {
            id: id.clone(),
            text,
            reply,
        })?;
        rx.await.map_err(|_| HubError::Shutdown)?
    }

    /// Snapshot of the registry, ordered by connection ID.
    ///
    /// Empty once the hub is shut down.
    pub async fn connections(&self) -> BTreeMap<ConnectionId, Arc<Connection>> {
        let (reply, rx) = oneshot::channel();
        if self.submit(Command::Snapshot { reply }).is_err() {
            return BTreeMap::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.submit(Command::Count { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Tear down every connection and stop the coordinator.
    ///
    /// Later operations fail with [`HubError::Shutdown`]. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.broadcast_permits.close();
        let (done, rx) = oneshot::channel();
        if self.submit(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Run a connection over `transport` until it ends.
    ///
    /// Registers the connection, runs both pumps, and returns after teardown
    /// and once the outbound pump has finished writing.
    pub async fn serve(&self, transport: Transport) {
        session::run_session(self.clone(), transport).await;
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| HubError::Shutdown)
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
