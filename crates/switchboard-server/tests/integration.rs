//! End-to-end tests using a real WebSocket client.

mod common;

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use switchboard_server::config::{HubConfig, ServerConfig};
use switchboard_server::server::SwitchboardServer;
use switchboard_server::websocket::Hub;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use common::{Event, RecordingHandler, TIMEOUT};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a test server on a free port and return the WS URL.
async fn boot_server(
    config: ServerConfig,
) -> (String, Arc<SwitchboardServer>, Arc<RecordingHandler>) {
    let handler = RecordingHandler::new();
    let hub = Hub::new(HubConfig::default(), handler.clone());
    let ws_path = config.ws_path.clone();
    let server = Arc::new(SwitchboardServer::new(config, hub));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}{ws_path}"), server, handler)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _resp) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

/// Next text frame parsed as JSON, skipping control frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("read timed out")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for_connections(server: &SwitchboardServer, n: usize) {
    timeout(TIMEOUT, async {
        while server.hub().connection_count().await != n {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

#[tokio::test]
async fn client_message_reaches_handler() {
    let (url, server, handler) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&url).await;
    wait_for_connections(&server, 1).await;

    ws.send(Message::Text(
        json!({"type": "chat_message", "data": {"text": "hi"}})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    handler
        .wait_for(|events| events.iter().any(|e| matches!(e, Event::Message(..))))
        .await;
    let message = handler
        .events()
        .into_iter()
        .find(|e| matches!(e, Event::Message(..)))
        .unwrap();
    let Event::Message(_, msg_type, data) = message else {
        unreachable!()
    };
    assert_eq!(msg_type, "chat_message");
    assert_eq!(data["text"], "hi");
}

#[tokio::test]
async fn broadcast_reaches_every_client() {
    let (url, server, _handler) = boot_server(ServerConfig::default()).await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    wait_for_connections(&server, 2).await;

    server
        .hub()
        .broadcast("announcement", &json!({"text": "hello all"}))
        .unwrap();

    for ws in [&mut a, &mut b] {
        let msg = next_json(ws).await;
        assert_eq!(msg["type"], "announcement");
        assert_eq!(msg["data"]["text"], "hello all");
        assert!(msg["timestamp"].is_string());
    }
}

#[tokio::test]
async fn client_close_unregisters() {
    let (url, server, handler) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&url).await;
    wait_for_connections(&server, 1).await;

    ws.close(None).await.unwrap();
    handler
        .wait_for(|events| events.iter().any(|e| matches!(e, Event::Disconnect(_))))
        .await;
    assert_eq!(server.hub().connection_count().await, 0);
    assert_eq!(handler.count(|e| matches!(e, Event::Error(..))), 0);
}

#[tokio::test]
async fn dropped_client_disconnects_without_error() {
    let (url, server, handler) = boot_server(ServerConfig::default()).await;
    let ws = connect(&url).await;
    wait_for_connections(&server, 1).await;

    // No close handshake, just the socket going away.
    drop(ws);
    handler
        .wait_for(|events| events.iter().any(|e| matches!(e, Event::Disconnect(_))))
        .await;

    assert_eq!(server.hub().connection_count().await, 0);
    assert_eq!(handler.count(|e| matches!(e, Event::Error(..))), 0);
}

#[tokio::test]
async fn oversized_message_reports_size_limit() {
    let (url, server, handler) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&url).await;
    wait_for_connections(&server, 1).await;

    let big = json!({"type": "chat_message", "data": "a".repeat(600)}).to_string();
    ws.send(Message::Text(big.into())).await.unwrap();
    handler
        .wait_for(|events| events.iter().any(|e| matches!(e, Event::Disconnect(_))))
        .await;

    let errors = handler.error_messages();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("exceeds limit of 512 bytes"), "{errors:?}");
}

#[tokio::test]
async fn connection_limit_rejects_upgrade() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (url, server, _handler) = boot_server(config).await;
    let _first = connect(&url).await;
    wait_for_connections(&server, 1).await;

    let second = timeout(TIMEOUT, connect_async(url.as_str())).await.unwrap();
    assert!(second.is_err());
    assert_eq!(server.hub().connection_count().await, 1);
}

#[tokio::test]
async fn concurrent_upgrades_respect_connection_limit() {
    let config = ServerConfig {
        max_connections: 2,
        ..ServerConfig::default()
    };
    let (url, server, _handler) = boot_server(config).await;

    let attempts = (0..6).map(|_| timeout(TIMEOUT, connect_async(url.as_str())));
    let results = futures::future::join_all(attempts).await;
    let clients: Vec<_> = results
        .into_iter()
        .map(|r| r.expect("connect timed out"))
        .filter_map(Result::ok)
        .collect();

    assert_eq!(clients.len(), 2);
    wait_for_connections(&server, 2).await;
}

#[tokio::test]
async fn slot_frees_when_client_leaves() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (url, server, handler) = boot_server(config).await;
    let mut first = connect(&url).await;
    wait_for_connections(&server, 1).await;

    first.close(None).await.unwrap();
    handler
        .wait_for(|events| events.iter().any(|e| matches!(e, Event::Disconnect(_))))
        .await;

    // The session may still be flushing its close frame; retry briefly.
    let reconnected = timeout(TIMEOUT, async {
        loop {
            if let Ok((ws, _)) = connect_async(url.as_str()).await {
                return ws;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reconnected.is_ok());
}

#[tokio::test]
async fn stop_closes_clients() {
    let (url, server, handler) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&url).await;
    wait_for_connections(&server, 1).await;

    server.stop().await;
    handler
        .wait_for(|events| events.iter().any(|e| matches!(e, Event::Disconnect(_))))
        .await;

    // The client sees a close frame (or the stream ending) rather than hanging.
    let closed = timeout(TIMEOUT, async {
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Close(_)) {
                return;
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn health_counts_live_connections() {
    let (url, server, _handler) = boot_server(ServerConfig::default()).await;
    let _ws = connect(&url).await;
    wait_for_connections(&server, 1).await;

    let health_url = url.replace("ws://", "").replace("/ws", "");
    let mut stream = tokio::net::TcpStream::connect(&health_url).await.unwrap();
    let request = format!("GET /health HTTP/1.1\r\nHost: {health_url}\r\nConnection: close\r\n\r\n");
    tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    let _ = tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let parsed: Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed["connections"], 1);
}
