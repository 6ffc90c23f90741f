//! Shared helpers for hub integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::{ConnectionId, HubError};
use switchboard_server::config::HubConfig;
use switchboard_server::websocket::{Connection, Handler};
use tokio::sync::Notify;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Handler events in the order they were observed.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Connect(ConnectionId),
    Disconnect(ConnectionId),
    Message(ConnectionId, String, Value),
    Error(ConnectionId, &'static str),
}

impl Event {
    pub fn conn_id(&self) -> &ConnectionId {
        match self {
            Self::Connect(id) | Self::Disconnect(id) | Self::Message(id, ..) | Self::Error(id, _) => id,
        }
    }
}

/// Records every callback and lets tests wait for a condition.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
    error_text: Mutex<Vec<String>>,
    changed: Notify,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, id: &ConnectionId) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.conn_id() == id)
            .cloned()
            .collect()
    }

    /// Display text of every error passed to `on_error`.
    pub fn error_messages(&self) -> Vec<String> {
        self.error_text.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Wait until `pred` holds over the recorded events.
    pub async fn wait_for(&self, pred: impl Fn(&[Event]) -> bool) {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if pred(&self.events.lock()) {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(TIMEOUT, wait)
            .await
            .expect("timed out waiting for handler events");
    }

    pub async fn wait_for_disconnect(&self, id: &ConnectionId) {
        self.wait_for(|events| events.contains(&Event::Disconnect(id.clone())))
            .await;
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn on_connect(&self, conn: &Arc<Connection>) {
        self.push(Event::Connect(conn.id().clone()));
    }

    async fn on_disconnect(&self, conn: &Arc<Connection>) {
        self.push(Event::Disconnect(conn.id().clone()));
    }

    async fn on_message(&self, conn: &Arc<Connection>, msg_type: &str, data: Value) {
        self.push(Event::Message(conn.id().clone(), msg_type.to_owned(), data));
    }

    async fn on_error(&self, conn: &Arc<Connection>, err: &HubError) {
        self.error_text.lock().push(err.to_string());
        self.push(Event::Error(conn.id().clone(), err.code()));
    }
}

pub fn config_with_queue(capacity: usize) -> HubConfig {
    HubConfig {
        send_queue_capacity: capacity,
        ..HubConfig::default()
    }
}
