//! Outbound pump: drains the connection's queue to the transport and sends
//! keepalive pings.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use switchboard_core::TransportError;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, trace};

use super::connection::OutboundQueue;
use super::transport::{Frame, FrameSink};

/// Timing and batching for the outbound pump.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OutboundLimits {
    pub keepalive_interval: Duration,
    pub write_timeout: Duration,
    pub max_batch: usize,
}

/// Write queued messages until the queue is closed or a write fails.
///
/// Messages already waiting when the pump wakes are coalesced into one
/// flush of up to `max_batch` frames. Once the queue is closed and drained a
/// best-effort close frame is sent.
pub(crate) async fn run_outbound(
    mut queue: OutboundQueue,
    mut sink: FrameSink,
    limits: OutboundLimits,
) -> Result<(), TransportError> {
    let mut keepalive = tokio::time::interval(limits.keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = keepalive.tick().await;

    loop {
        tokio::select! {
            msg = queue.recv() => match msg {
                Some(first) => {
                    let written = write_batch(&mut sink, &mut queue, first, limits).await?;
                    trace!(written, "flushed outbound batch");
                }
                None => {
                    debug!("send queue closed, closing transport");
                    let _ = timeout(limits.write_timeout, sink.send(Frame::close_normal())).await;
                    let _ = timeout(limits.write_timeout, sink.close()).await;
                    return Ok(());
                }
            },
            _ = keepalive.tick() => {
                timeout(limits.write_timeout, sink.send(Frame::Ping(Bytes::new())))
                    .await
                    .map_err(|_| TransportError::WriteTimeout(limits.write_timeout))??;
                trace!("keepalive ping sent");
            }
        }
    }
}

async fn write_batch(
    sink: &mut FrameSink,
    queue: &mut OutboundQueue,
    first: Arc<str>,
    limits: OutboundLimits,
) -> Result<usize, TransportError> {
    let write = async {
        sink.feed(Frame::Text(first.to_string())).await?;
        let mut written = 1;
        while written < limits.max_batch {
            let Some(next) = queue.try_recv() else {
                break;
            };
            sink.feed(Frame::Text(next.to_string())).await?;
            written += 1;
        }
        sink.flush().await?;
        Ok::<_, TransportError>(written)
    };
    timeout(limits.write_timeout, write)
        .await
        .map_err(|_| TransportError::WriteTimeout(limits.write_timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::hub::Command;
    use crate::websocket::connection::Connection;
    use crate::websocket::transport::Transport;
    use tokio::sync::mpsc::unbounded_channel;

    fn limits() -> OutboundLimits {
        OutboundLimits {
            keepalive_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
            max_batch: 64,
        }
    }

    #[tokio::test]
    async fn drains_queue_then_sends_close() {
        let (tx, _rx) = unbounded_channel::<Command>();
        let (conn, queue) = Connection::new(8, tx);
        let (transport, mut peer) = Transport::duplex(16);

        conn.send("a", &1).unwrap();
        conn.send("b", &2).unwrap();
        let _ = conn.close_queue();

        run_outbound(queue, transport.sink, limits()).await.unwrap();

        let Some(Frame::Text(first)) = peer.recv().await else {
            panic!("expected text frame");
        };
        assert!(first.contains("\"type\":\"a\""));
        let Some(Frame::Text(second)) = peer.recv().await else {
            panic!("expected text frame");
        };
        assert!(second.contains("\"type\":\"b\""));
        assert_eq!(peer.recv().await, Some(Frame::close_normal()));
    }

    #[tokio::test(start_paused = true)]
    async fn sends_keepalive_pings() {
        let (tx, _rx) = unbounded_channel::<Command>();
        let (conn, queue) = Connection::new(8, tx);
        let (transport, mut peer) = Transport::duplex(16);

        let pump = tokio::spawn(run_outbound(queue, transport.sink, limits()));

        // Paused clock auto-advances to the next tick while both sides idle.
        assert_eq!(peer.recv().await, Some(Frame::Ping(Bytes::new())));

        let _ = conn.close_queue();
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn write_to_gone_peer_fails() {
        let (tx, _rx) = unbounded_channel::<Command>();
        let (conn, queue) = Connection::new(8, tx);
        let (transport, peer) = Transport::duplex(16);
        drop(peer);

        conn.send("a", &1).unwrap();
        let result = run_outbound(queue, transport.sink, limits()).await;
        assert_eq!(result, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn batch_respects_limit() {
        let (tx, _rx) = unbounded_channel::<Command>();
        let (conn, mut queue) = Connection::new(8, tx);
        let (mut transport, mut peer) = Transport::duplex(16);
        for i in 0..5 {
            conn.send("n", &i).unwrap();
        }

        let first = queue.recv().await.unwrap();
        let small = OutboundLimits {
            max_batch: 3,
            ..limits()
        };
        let written = write_batch(&mut transport.sink, &mut queue, first, small)
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(conn.queued(), 2);
        for _ in 0..3 {
            assert!(matches!(peer.recv().await, Some(Frame::Text(_))));
        }
    }
}
