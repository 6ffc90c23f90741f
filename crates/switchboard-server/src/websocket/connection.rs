//! Per-client connection state shared between the hub, the pumps, and
//! application handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use switchboard_core::message::encode_payload;
use switchboard_core::{ConnectionId, HubError, Result, WireMessage};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::hub::{Command, CommandSender};

/// Why an enqueue attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    /// The queue is at capacity.
    Full,
    /// The queue has been closed by teardown.
    Closed,
}

/// Terminal error waiting for the lifecycle task to report it.
enum ErrorSlot {
    Open(Option<HubError>),
    /// `on_disconnect` is about to fire; later errors are dropped.
    Sealed,
}

/// A live client connection.
///
/// Created by [`Hub::open_connection`](super::hub::Hub::open_connection) and
/// torn down exactly once, by the hub's coordination loop. After teardown the
/// outbound queue is closed and [`Connection::closed`] resolves.
pub struct Connection {
    id: ConnectionId,
    connected_at: DateTime<Utc>,
    /// Outbound queue. `None` once teardown has closed it.
    tx: Mutex<Option<mpsc::Sender<Arc<str>>>>,
    metadata: RwLock<HashMap<String, Value>>,
    /// Cancelled when the hub has removed this connection.
    torn_down: CancellationToken,
    overflowed: AtomicBool,
    error: Mutex<ErrorSlot>,
    commands: CommandSender,
}

/// Receiving end of a connection's outbound queue, drained by the outbound pump.
pub struct OutboundQueue {
    rx: mpsc::Receiver<Arc<str>>,
}

impl OutboundQueue {
    /// Wait for the next message. `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Take a message if one is ready.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.rx.try_recv().ok()
    }
}

/// Serializable snapshot of a connection.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection ID.
    pub id: ConnectionId,
    /// When the connection was opened.
    pub connected_at: DateTime<Utc>,
    /// Messages waiting in the outbound queue.
    pub queued: usize,
    /// Application metadata.
    pub metadata: HashMap<String, Value>,
}

impl Connection {
    pub(crate) fn new(capacity: usize, commands: CommandSender) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            connected_at: Utc::now(),
            tx: Mutex::new(Some(tx)),
            metadata: RwLock::new(HashMap::new()),
            torn_down: CancellationToken::new(),
            overflowed: AtomicBool::new(false),
            error: Mutex::new(ErrorSlot::Open(None)),
            commands,
        });
        (conn, OutboundQueue { rx })
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// When the connection was opened.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Serialize `(msg_type, data)` and enqueue it without blocking.
    ///
    /// A full queue tears the connection down and returns
    /// [`HubError::Overflow`]; later calls return
    /// [`HubError::ConnectionClosed`].
    pub fn send<T: Serialize + ?Sized>(&self, msg_type: &str, data: &T) -> Result<()> {
        let text = encode_payload(msg_type, data)?;
        self.send_text(text.into())
    }

    /// Enqueue a prebuilt envelope.
    pub fn send_message(&self, msg: &WireMessage) -> Result<()> {
        let text = msg.encode()?;
        self.send_text(text.into())
    }

    fn send_text(&self, text: Arc<str>) -> Result<()> {
        match self.try_enqueue(text) {
            Ok(()) => Ok(()),
            Err(EnqueueError::Closed) => Err(HubError::ConnectionClosed(self.id.clone())),
            Err(EnqueueError::Full) => {
                // Close first so nothing else lands in the queue while the
                // hub processes the unregister.
                let _ = self.close_queue();
                self.mark_overflowed();
                self.request_unregister();
                Err(HubError::Overflow(self.id.clone()))
            }
        }
    }

    pub(crate) fn try_enqueue(&self, text: Arc<str>) -> std::result::Result<(), EnqueueError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Set a metadata value, replacing any previous one.
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        let _ = self.metadata.write().insert(key.into(), value);
    }

    /// Get a metadata value.
    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.read().get(key).cloned()
    }

    /// Remove a metadata value, returning it.
    pub fn remove_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.write().remove(key)
    }

    /// Ask the hub to tear this connection down.
    pub fn close(&self) {
        self.request_unregister();
    }

    /// Whether the hub has torn this connection down.
    pub fn is_closed(&self) -> bool {
        self.torn_down.is_cancelled()
    }

    /// Resolves once the hub has torn this connection down.
    pub async fn closed(&self) {
        self.torn_down.cancelled().await;
    }

    /// Messages waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Snapshot for diagnostics and `/health`-style listings.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            connected_at: self.connected_at,
            queued: self.queued(),
            metadata: self.metadata.read().clone(),
        }
    }

    /// Drop the queue sender. Returns `true` if this call closed it.
    pub(crate) fn close_queue(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    pub(crate) fn mark_torn_down(&self) {
        self.torn_down.cancel();
    }

    pub(crate) fn mark_overflowed(&self) {
        self.overflowed.store(true, Ordering::Release);
    }

    pub(crate) fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    /// Record the error that ended this connection. Only the first error is
    /// kept, and nothing is kept once the hub has torn the connection down.
    pub(crate) fn record_error(&self, err: HubError) -> bool {
        let mut slot = self.error.lock();
        match &mut *slot {
            ErrorSlot::Open(current @ None) if !self.torn_down.is_cancelled() => {
                *current = Some(err);
                true
            }
            _ => false,
        }
    }

    /// Take the recorded error and refuse any further ones.
    pub(crate) fn seal_error(&self) -> Option<HubError> {
        match std::mem::replace(&mut *self.error.lock(), ErrorSlot::Sealed) {
            ErrorSlot::Open(err) => err,
            ErrorSlot::Sealed => None,
        }
    }

    fn request_unregister(&self) {
        let _ = self.commands.send(Command::Unregister {
            id: self.id.clone(),
        });
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
