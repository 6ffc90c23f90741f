//! `WebSocket` connection hub, pumps, and transport plumbing.

pub mod connection;
pub(crate) mod coordinator;
pub mod handler;
pub mod hub;
pub(crate) mod inbound;
pub(crate) mod outbound;
pub(crate) mod session;
pub mod transport;

pub use connection::{Connection, ConnectionInfo, OutboundQueue};
pub use handler::{CallbackHandler, Handler, NoopHandler};
pub use hub::Hub;
pub use transport::{CloseFrame, Frame, PeerEnd, Transport};
