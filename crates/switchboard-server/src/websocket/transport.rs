//! Frame-level transport abstraction.
//!
//! The pumps only see a [`FrameSink`] and a [`FrameStream`]. Production
//! connections come from an Axum [`WebSocket`]; tests use
//! [`Transport::duplex`], which hands back the peer's end of an in-memory
//! channel pair.

use std::io;
use std::pin::Pin;

use axum::extract::ws::{self, Message, WebSocket};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use switchboard_core::TransportError;

/// Close codes used by the pumps.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (page navigation, server restart).
    pub const GOING_AWAY: u16 = 1001;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
}

/// Close frame payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close status code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

/// A single transport frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
    /// Keepalive ping.
    Ping(Bytes),
    /// Keepalive acknowledgement.
    Pong(Bytes),
    /// Close handshake.
    Close(Option<CloseFrame>),
}

impl Frame {
    /// A close frame with code 1000.
    pub fn close_normal() -> Self {
        Self::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: String::new(),
        }))
    }
}

/// Write half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Read half of a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// A bidirectional frame transport, split into halves owned by the pumps.
pub struct Transport {
    pub(crate) sink: FrameSink,
    pub(crate) stream: FrameStream,
}

impl Transport {
    /// Wrap any frame sink and stream.
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Adapt an upgraded Axum socket.
    pub fn from_websocket(socket: WebSocket) -> Self {
        let (ws_tx, ws_rx) = socket.split();
        let sink = ws_tx
            .sink_map_err(|e| TransportError::Protocol(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
        let stream = ws_rx.map(|item| match item {
            Ok(msg) => Ok(Frame::from(msg)),
            // A peer that drops the socket never sends a close frame.
            Err(e) if is_abrupt_disconnect(&e) => Ok(Frame::Close(Some(CloseFrame {
                code: close_code::ABNORMAL,
                reason: e.to_string(),
            }))),
            Err(e) => Err(TransportError::Protocol(e.to_string())),
        });
        Self::new(sink, stream)
    }

    /// In-memory transport plus the peer's end of it.
    ///
    /// `buffer` bounds both directions, so a peer that stops reading
    /// eventually stalls the outbound pump.
    pub fn duplex(buffer: usize) -> (Self, PeerEnd) {
        let (to_peer_tx, to_peer_rx) = mpsc::channel::<Frame>(buffer);
        let (from_peer_tx, from_peer_rx) = mpsc::channel::<Result<Frame, TransportError>>(buffer);
        let sink = to_peer_tx.sink_map_err(|_| TransportError::Closed);
        let transport = Self::new(sink, from_peer_rx);
        let peer = PeerEnd {
            incoming: to_peer_rx,
            outgoing: from_peer_tx,
        };
        (transport, peer)
    }
}

/// Whether a read error means the peer went away without a close handshake:
/// a reset or aborted socket, or end of stream mid-session.
fn is_abrupt_disconnect(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if matches!(
                io.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        if e.to_string().contains("without closing handshake") {
            return true;
        }
        current = e.source();
    }
    false
}

/// The remote side of a [`Transport::duplex`] pair.
pub struct PeerEnd {
    incoming: mpsc::Receiver<Frame>,
    outgoing: mpsc::Sender<Result<Frame, TransportError>>,
}

impl PeerEnd {
    /// Next frame written by the server, or `None` once its sink is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.incoming.next().await
    }

    /// Send a frame to the server.
    pub async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.outgoing
            .send(Ok(frame))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Send a text frame to the server.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(Frame::Text(text.into())).await
    }

    /// Make the server's next read fail with `err`.
    pub async fn fail(&mut self, err: TransportError) -> Result<(), TransportError> {
        self.outgoing
            .send(Err(err))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// End the server's read stream without a close frame.
    pub fn hang_up(&mut self) {
        self.outgoing.close_channel();
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(text.into()),
            Frame::Binary(data) => Self::Binary(data),
            Frame::Ping(data) => Self::Ping(data),
            Frame::Pong(data) => Self::Pong(data),
            Frame::Close(close) => Self::Close(close.map(|c| ws::CloseFrame {
                code: c.code,
                reason: c.reason.into(),
            })),
        }
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Self::Text(text.as_str().to_owned()),
            Message::Binary(data) => Self::Binary(data),
            Message::Ping(data) => Self::Ping(data),
            Message::Pong(data) => Self::Pong(data),
            Message::Close(close) => Self::Close(close.map(|c| CloseFrame {
                code: c.code,
                reason: c.reason.as_str().to_owned(),
            })),
        }
    }
}
