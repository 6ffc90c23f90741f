//! # switchboard-core
//!
//! Foundation types shared by every switchboard crate:
//!
//! - [`ids::ConnectionId`]: time-ordered connection identifiers
//! - [`message::WireMessage`]: the JSON envelope exchanged with clients
//! - [`errors`]: the hub and transport error taxonomy
//! - [`logging`]: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;

pub use errors::{HubError, Result, TransportError};
pub use ids::ConnectionId;
pub use message::WireMessage;
