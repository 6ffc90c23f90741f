//! Connection session: one client from transport handoff through teardown.

use switchboard_core::{HubError, TransportError};
use tracing::{Instrument, debug, info_span, warn};

use super::connection::Connection;
use super::hub::Hub;
use super::inbound::{InboundLimits, run_inbound};
use super::outbound::{OutboundLimits, run_outbound};
use super::transport::Transport;

/// Run a session for a connected client.
///
/// 1. Creates the connection and starts the outbound pump
/// 2. Registers with the hub (waits for `on_connect`)
/// 3. Runs the inbound pump on this task
/// 4. Unregisters and waits for the outbound pump to flush and close
pub(crate) async fn run_session(hub: Hub, transport: Transport) {
    let Transport { sink, stream } = transport;
    let (conn, queue) = hub.open_connection();
    let span = info_span!("connection", conn_id = %conn.id());

    async move {
        let config = hub.config();
        let handler = hub.handler().clone();

        let outbound_limits = OutboundLimits {
            keepalive_interval: config.keepalive_interval,
            write_timeout: config.write_timeout,
            max_batch: config.max_batch,
        };
        let outbound = tokio::spawn(
            {
                let conn = conn.clone();
                let hub = hub.clone();
                async move {
                    if let Err(e) = run_outbound(queue, sink, outbound_limits).await {
                        report(&conn, e);
                        hub.unregister(conn.id());
                    }
                }
            }
            .in_current_span(),
        );

        hub.register(conn.clone()).await;

        let inbound_limits = InboundLimits {
            read_timeout: config.read_timeout,
            max_message_size: config.max_message_size,
        };
        if let Err(e) = run_inbound(&conn, stream, &handler, inbound_limits).await {
            report(&conn, e);
        }
        hub.unregister(conn.id());

        if let Err(e) = outbound.await {
            warn!(error = %e, "outbound pump panicked");
        }
    }
    .instrument(span)
    .await;
}

/// Hand a transport failure to the lifecycle task, which reports it to the
/// handler ahead of `on_disconnect`. Failures after teardown are only logged.
fn report(conn: &Connection, err: TransportError) {
    warn!(error = %err, "connection failed");
    if !conn.record_error(HubError::Transport(err)) {
        debug!("connection already ended, error not reported");
    }
}
