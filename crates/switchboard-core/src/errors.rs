//! Error taxonomy for the connection hub.
//!
//! - [`TransportError`]: read/write failures on one connection's socket. Always
//!   terminal for that connection, never for the hub.
//! - [`HubError`]: everything a caller of the hub or a handler callback can
//!   observe. Each variant maps to a stable machine code via [`HubError::code`].

use std::time::Duration;

use thiserror::Error;

use crate::ids::ConnectionId;

/// Failures of the underlying bidirectional stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer or the local side already closed the stream.
    #[error("transport closed")]
    Closed,
    /// No frame (data or keepalive acknowledgement) arrived within the read deadline.
    #[error("read deadline of {0:?} exceeded")]
    ReadTimeout(Duration),
    /// A write did not complete within the write deadline.
    #[error("write deadline of {0:?} exceeded")]
    WriteTimeout(Duration),
    /// The peer sent a close frame with a code other than normal/going-away.
    #[error("unexpected close (code {code}): {reason}")]
    UnexpectedClose {
        /// WebSocket close code.
        code: u16,
        /// Close reason sent by the peer.
        reason: String,
    },
    /// An inbound frame exceeded the configured read limit.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Frame size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// Protocol or I/O error reported by the socket implementation.
    #[error("transport error: {0}")]
    Protocol(String),
}

/// Errors surfaced by hub and connection operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// `send_to` targeted an ID that is not registered.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
    /// The payload could not be encoded as JSON.
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
    /// An inbound frame did not decode as a wire envelope.
    #[error("failed to decode frame: {0}")]
    Decode(String),
    /// The connection's outbound queue was full; it is being torn down.
    #[error("outbound queue full for connection {0}, closing it")]
    Overflow(ConnectionId),
    /// The connection's outbound queue is already closed.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    /// Too many broadcasts are pending in the coordination loop.
    #[error("broadcast rejected: {capacity} broadcasts already pending")]
    Backpressure {
        /// Configured broadcast queue capacity.
        capacity: usize,
    },
    /// The hub's coordination loop has stopped.
    #[error("hub is shut down")]
    Shutdown,
    /// The connection's transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HubError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Serialization(_) => "SERIALIZATION_FAILED",
            Self::Decode(_) => "DECODE_FAILED",
            Self::Overflow(_) => "QUEUE_OVERFLOW",
            Self::ConnectionClosed(_) => "CONNECTION_CLOSED",
            Self::Backpressure { .. } => "BACKPRESSURE",
            Self::Shutdown => "HUB_SHUTDOWN",
            Self::Transport(_) => "TRANSPORT_FAILURE",
        }
    }

    /// Whether this error ends the connection it refers to.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Overflow(_) | Self::Transport(_))
    }
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
