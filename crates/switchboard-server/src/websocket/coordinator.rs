//! The coordination loop that owns the connection registry.
//!
//! Handler callbacks never run on this task. Registration spawns a
//! per-connection lifecycle task that runs `on_connect`, waits for teardown,
//! then runs `on_disconnect`, so a handler can call back into the hub
//! without deadlocking it.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use switchboard_core::{ConnectionId, HubError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::connection::{Connection, EnqueueError};
use super::handler::Handler;
use super::hub::Command;
use crate::metrics::{
    WS_BROADCASTS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_QUEUE_OVERFLOWS_TOTAL,
};

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Requested,
    Overflow,
    Shutdown,
}

pub(crate) struct Coordinator {
    commands: mpsc::UnboundedReceiver<Command>,
    registry: BTreeMap<ConnectionId, Arc<Connection>>,
    handler: Arc<dyn Handler>,
}

impl Coordinator {
    pub(crate) fn new(commands: mpsc::UnboundedReceiver<Command>, handler: Arc<dyn Handler>) -> Self {
        Self {
            commands,
            registry: BTreeMap::new(),
            handler,
        }
    }

    /// Process commands until shutdown or until every sender is gone.
    pub(crate) async fn run(mut self) {
        debug!("hub coordinator started");
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register { conn, ready } => self.register(conn, ready),
                Command::Unregister { id } => self.remove(&id, Removal::Requested),
                Command::Broadcast { text, permit } => {
                    self.broadcast(&text);
                    drop(permit);
                }
                Command::SendTo { id, text, reply } => {
                    let result = self.send_to(&id, text);
                    let _ = reply.send(result);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.registry.clone());
                }
                Command::Count { reply } => {
                    let _ = reply.send(self.registry.len());
                }
                Command::Shutdown { done } => {
                    self.shutdown();
                    let _ = done.send(());
                    break;
                }
            }
        }
        // Anything still queued (late registrations included) is dropped
        // here; their reply channels close and callers observe the shutdown.
        self.commands.close();
        self.shutdown();
        debug!("hub coordinator stopped");
    }

    fn register(&mut self, conn: Arc<Connection>, ready: oneshot::Sender<()>) {
        let id = conn.id().clone();
        if let Some(previous) = self.registry.insert(id.clone(), conn.clone()) {
            warn!(conn_id = %id, "duplicate connection id registered, replacing");
            let _ = previous.close_queue();
            previous.mark_torn_down();
        }

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        self.record_active();
        info!(conn_id = %id, total = self.registry.len(), "client connected");

        let handler = self.handler.clone();
        drop(tokio::spawn(async move {
            handler.on_connect(&conn).await;
            let _ = ready.send(());
            conn.closed().await;
            let recorded = conn.seal_error();
            let err = if conn.overflowed() {
                Some(HubError::Overflow(conn.id().clone()))
            } else {
                recorded
            };
            if let Some(err) = err {
                handler.on_error(&conn, &err).await;
            }
            handler.on_disconnect(&conn).await;
        }));
    }

    fn remove(&mut self, id: &ConnectionId, reason: Removal) {
        let Some(conn) = self.registry.remove(id) else {
            return;
        };
        if reason == Removal::Overflow {
            conn.mark_overflowed();
        }
        if conn.overflowed() {
            counter!(WS_QUEUE_OVERFLOWS_TOTAL).increment(1);
        }
        let _ = conn.close_queue();
        conn.mark_torn_down();

        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        self.record_active();
        info!(
            conn_id = %id,
            ?reason,
            total = self.registry.len(),
            "client disconnected"
        );
    }

    fn broadcast(&mut self, text: &Arc<str>) {
        let mut delivered = 0usize;
        let mut overflowed = Vec::new();
        for (id, conn) in &self.registry {
            match conn.try_enqueue(text.clone()) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => overflowed.push(id.clone()),
                // Already closing; its unregister is behind us in the queue.
                Err(EnqueueError::Closed) => {}
            }
        }
        for id in &overflowed {
            warn!(conn_id = %id, "send queue full during broadcast, closing connection");
            self.remove(id, Removal::Overflow);
        }

        counter!(WS_BROADCASTS_TOTAL).increment(1);
        debug!(delivered, dropped = overflowed.len(), "broadcast delivered");
    }

    fn send_to(&mut self, id: &ConnectionId, text: Arc<str>) -> switchboard_core::Result<()> {
        let Some(conn) = self.registry.get(id) else {
            return Err(HubError::NotFound(id.clone()));
        };
        match conn.try_enqueue(text) {
            Ok(()) => Ok(()),
            Err(EnqueueError::Closed) => Err(HubError::ConnectionClosed(id.clone())),
            Err(EnqueueError::Full) => {
                warn!(conn_id = %id, "send queue full, closing connection");
                self.remove(id, Removal::Overflow);
                Err(HubError::Overflow(id.clone()))
            }
        }
    }

    fn shutdown(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        info!(count = self.registry.len(), "closing all connections");
        let ids: Vec<ConnectionId> = self.registry.keys().cloned().collect();
        for id in &ids {
            self.remove(id, Removal::Shutdown);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_active(&self) {
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.registry.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::handler::NoopHandler;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc::unbounded_channel;

    struct Harness {
        tx: mpsc::UnboundedSender<Command>,
        coordinator: Coordinator,
    }

    fn harness() -> Harness {
        let (tx, rx) = unbounded_channel();
        Harness {
            tx,
            coordinator: Coordinator::new(rx, Arc::new(NoopHandler)),
        }
    }

    impl Harness {
        fn connection(&self, capacity: usize) -> Arc<Connection> {
            Connection::new(capacity, self.tx.clone()).0
        }

        fn insert(&mut self, conn: &Arc<Connection>) {
            let (ready, _rx) = oneshot::channel();
            self.coordinator.register(conn.clone(), ready);
        }
    }

    #[tokio::test]
    async fn register_and_remove() {
        let mut h = harness();
        let conn = h.connection(4);
        h.insert(&conn);
        assert!(h.coordinator.registry.contains_key(conn.id()));

        h.coordinator.remove(conn.id(), Removal::Requested);
        assert!(h.coordinator.registry.is_empty());
        assert!(conn.is_closed());
        assert_matches!(conn.send("x", &()), Err(HubError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn remove_unknown_is_noop() {
        let mut h = harness();
        h.coordinator
            .remove(&ConnectionId::from("conn_missing"), Removal::Requested);
        assert!(h.coordinator.registry.is_empty());
    }

    #[tokio::test]
    async fn broadcast_tears_down_full_recipients_only() {
        let mut h = harness();
        let (slow, _slow_queue) = Connection::new(1, h.tx.clone());
        let (fast, mut fast_queue) = Connection::new(8, h.tx.clone());
        h.insert(&slow);
        h.insert(&fast);

        h.coordinator.broadcast(&Arc::from("one"));
        h.coordinator.broadcast(&Arc::from("two"));

        assert!(!h.coordinator.registry.contains_key(slow.id()));
        assert!(slow.overflowed());
        assert!(h.coordinator.registry.contains_key(fast.id()));
        assert_eq!(fast_queue.recv().await.as_deref(), Some("one"));
        assert_eq!(fast_queue.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn send_to_unknown_is_not_found() {
        let mut h = harness();
        let result = h.coordinator.send_to(&ConnectionId::from("nope"), Arc::from("x"));
        assert_matches!(result, Err(HubError::NotFound(_)));
    }

    #[tokio::test]
    async fn send_to_full_queue_overflows() {
        let mut h = harness();
        let (conn, _queue) = Connection::new(1, h.tx.clone());
        h.insert(&conn);
        h.coordinator.send_to(conn.id(), Arc::from("a")).unwrap();
        let result = h.coordinator.send_to(conn.id(), Arc::from("b"));
        assert_matches!(result, Err(HubError::Overflow(_)));
        assert!(h.coordinator.registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let mut h = harness();
        let a = h.connection(2);
        let b = h.connection(2);
        h.insert(&a);
        h.insert(&b);
        h.coordinator.shutdown();
        assert!(h.coordinator.registry.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
