//! # switchboard-server
//!
//! Connection hub and `WebSocket` gateway.
//!
//! - [`websocket::hub::Hub`]: registry of live connections owned by a single
//!   coordination task; register, unregister, broadcast, targeted send
//! - Per-connection inbound and outbound pumps with keepalive and deadlines
//! - [`websocket::handler::Handler`]: application callbacks for connect,
//!   disconnect, message, and error events
//! - Axum upgrade route, `/health`, `/metrics`, and graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
