//! Chat room built on the hub: history replay, usernames, join/leave notices.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use switchboard_core::HubError;
use switchboard_server::websocket::{Connection, Handler, Hub};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Messages kept for replay to newly connected clients.
pub const HISTORY_LIMIT: usize = 100;

const USERNAME_KEY: &str = "username";
const ANONYMOUS: &str = "Anonymous";

/// Kind of chat entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// Regular user message.
    Message,
    /// A user connected.
    Join,
    /// A user disconnected.
    Leave,
}

/// One entry in the chat log, broadcast as `chat_message`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Entry ID.
    pub id: String,
    /// Connection that produced the entry.
    pub user_id: String,
    /// Display name at the time of the entry.
    pub username: String,
    /// Message text.
    pub message: String,
    /// When the entry was created.
    pub timestamp: DateTime<Utc>,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

impl ChatMessage {
    fn new(conn: &Connection, username: String, message: impl Into<String>, kind: ChatKind) -> Self {
        Self {
            id: format!("msg_{}", Uuid::now_v7()),
            user_id: conn.id().to_string(),
            username,
            message: message.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Chat room state and its [`Handler`] implementation.
#[derive(Default)]
pub struct ChatRoom {
    hub: OnceLock<Hub>,
    history: Mutex<VecDeque<ChatMessage>>,
}

impl ChatRoom {
    /// Create an empty room. Call [`ChatRoom::attach`] once the hub exists.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Give the room the hub it broadcasts through.
    pub fn attach(&self, hub: Hub) {
        if self.hub.set(hub).is_err() {
            warn!("chat room already attached to a hub");
        }
    }

    /// Snapshot of the replay history, oldest first.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().iter().cloned().collect()
    }

    /// Record `msg` and broadcast it as `chat_message`.
    fn publish(&self, msg: ChatMessage) {
        {
            let mut history = self.history.lock();
            history.push_back(msg.clone());
            while history.len() > HISTORY_LIMIT {
                let _ = history.pop_front();
            }
        }
        let Some(hub) = self.hub.get() else {
            debug!("chat room not attached, message recorded only");
            return;
        };
        if let Err(e) = hub.broadcast("chat_message", &msg) {
            warn!(error = %e, code = e.code(), "failed to broadcast chat message");
        }
    }
}

fn username(conn: &Connection) -> String {
    conn.get_metadata(USERNAME_KEY)
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| ANONYMOUS.to_owned())
}

/// Log a failed direct send. The hub already tears down on overflow.
fn log_send_failure(conn: &Connection, msg_type: &str, err: &HubError) {
    debug!(conn_id = %conn.id(), msg_type, error = %err, "reply not delivered");
}

#[async_trait]
impl Handler for ChatRoom {
    async fn on_connect(&self, conn: &Arc<Connection>) {
        info!(conn_id = %conn.id(), "chat client connected");
        let history = self.history();
        let payload = json!({ "messages": history, "count": history.len() });
        if let Err(e) = conn.send("chat_history", &payload) {
            log_send_failure(conn, "chat_history", &e);
        }
        self.publish(ChatMessage::new(
            conn,
            ANONYMOUS.to_owned(),
            "joined the chat",
            ChatKind::Join,
        ));
    }

    async fn on_disconnect(&self, conn: &Arc<Connection>) {
        info!(conn_id = %conn.id(), "chat client disconnected");
        self.publish(ChatMessage::new(
            conn,
            username(conn),
            "left the chat",
            ChatKind::Leave,
        ));
    }

    async fn on_message(&self, conn: &Arc<Connection>, msg_type: &str, data: Value) {
        match msg_type {
            "set_username" => {
                let Some(name) = data.get("username").and_then(Value::as_str) else {
                    debug!(conn_id = %conn.id(), "set_username without a username");
                    return;
                };
                let name = name.trim();
                if name.is_empty() {
                    return;
                }
                conn.set_metadata(USERNAME_KEY, Value::from(name));
                let reply = json!({ "username": name, "status": "success" });
                if let Err(e) = conn.send("username_set", &reply) {
                    log_send_failure(conn, "username_set", &e);
                }
            }
            "chat_message" => {
                let Some(text) = data.get("message").and_then(Value::as_str) else {
                    debug!(conn_id = %conn.id(), "chat_message without text");
                    return;
                };
                self.publish(ChatMessage::new(conn, username(conn), text, ChatKind::Message));
            }
            "ping" => {
                if let Err(e) = conn.send("pong", &json!({ "timestamp": Utc::now() })) {
                    log_send_failure(conn, "pong", &e);
                }
            }
            other => debug!(conn_id = %conn.id(), msg_type = other, "ignoring unknown message type"),
        }
    }

    async fn on_error(&self, conn: &Arc<Connection>, err: &HubError) {
        warn!(conn_id = %conn.id(), code = err.code(), error = %err, "chat connection error");
    }
}
