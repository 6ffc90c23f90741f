//! Inbound pump: reads frames, decodes envelopes, dispatches to the handler.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use switchboard_core::{TransportError, WireMessage};
use tracing::{debug, trace, warn};

use super::connection::Connection;
use super::handler::Handler;
use super::transport::{CloseFrame, Frame, FrameStream, close_code};
use crate::metrics::WS_DECODE_FAILURES_TOTAL;

/// Limits applied by the inbound pump.
#[derive(Clone, Copy, Debug)]
pub(crate) struct InboundLimits {
    pub read_timeout: Duration,
    pub max_message_size: usize,
}

/// Read until the peer closes, the read fails, or the hub tears the
/// connection down.
///
/// Every frame, including keepalive acknowledgements, refreshes the read
/// deadline. Frames that fail to decode are logged and skipped. Returns
/// `Ok` for orderly ends and the terminal error otherwise.
pub(crate) async fn run_inbound(
    conn: &Arc<Connection>,
    mut stream: FrameStream,
    handler: &Arc<dyn Handler>,
    limits: InboundLimits,
) -> Result<(), TransportError> {
    loop {
        let next = tokio::select! {
            () = conn.closed() => return Ok(()),
            next = tokio::time::timeout(limits.read_timeout, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => return Err(TransportError::ReadTimeout(limits.read_timeout)),
            Ok(None) => {
                debug!("peer stream ended");
                return Ok(());
            }
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Text(text) => dispatch(conn, handler, &text, limits).await?,
            Frame::Binary(data) => {
                check_size(data.len(), limits)?;
                match std::str::from_utf8(&data) {
                    Ok(text) => dispatch(conn, handler, text, limits).await?,
                    Err(_) => {
                        counter!(WS_DECODE_FAILURES_TOTAL).increment(1);
                        warn!(len = data.len(), "received non-UTF8 binary frame, skipping");
                    }
                }
            }
            Frame::Ping(_) => trace!("ping received"),
            Frame::Pong(_) => trace!("keepalive acknowledged"),
            Frame::Close(close) => return classify_close(close),
        }
    }
}

async fn dispatch(
    conn: &Arc<Connection>,
    handler: &Arc<dyn Handler>,
    text: &str,
    limits: InboundLimits,
) -> Result<(), TransportError> {
    check_size(text.len(), limits)?;
    match WireMessage::decode(text) {
        Ok(msg) => {
            trace!(msg_type = %msg.msg_type, "dispatching message");
            handler.on_message(conn, &msg.msg_type, msg.data).await;
        }
        Err(e) => {
            counter!(WS_DECODE_FAILURES_TOTAL).increment(1);
            warn!(error = %e, "failed to decode frame, skipping");
        }
    }
    Ok(())
}

fn check_size(size: usize, limits: InboundLimits) -> Result<(), TransportError> {
    if size > limits.max_message_size {
        return Err(TransportError::MessageTooLarge {
            size,
            limit: limits.max_message_size,
        });
    }
    Ok(())
}

/// Normal, going-away, and abnormal closes are expected; anything else is
/// surfaced as an error.
fn classify_close(close: Option<CloseFrame>) -> Result<(), TransportError> {
    match close {
        None => {
            debug!("peer sent close frame");
            Ok(())
        }
        Some(CloseFrame { code, .. })
            if matches!(
                code,
                close_code::NORMAL | close_code::GOING_AWAY | close_code::ABNORMAL
            ) =>
        {
            debug!(code, "peer sent close frame");
            Ok(())
        }
        Some(CloseFrame { code, reason }) => Err(TransportError::UnexpectedClose { code, reason }),
    }
}
