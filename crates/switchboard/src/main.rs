//! # switchboard
//!
//! Chat room server binary: loads settings, starts the hub and the
//! HTTP/WebSocket server, and runs until ctrl-c.

#![deny(unsafe_code)]

mod chat;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_server::config::{HubConfig, ServerConfig};
use switchboard_server::server::SwitchboardServer;
use switchboard_server::shutdown::DrainOutcome;
use switchboard_server::websocket::Hub;
use switchboard_settings::SwitchboardSettings;

use crate::chat::ChatRoom;

/// Time allowed for the listener to drain after ctrl-c.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time chat server on the switchboard connection hub.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "WebSocket connection hub with a chat room demo")]
struct Cli {
    /// Settings file (defaults to `~/.switchboard/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    /// Do not install the Prometheus recorder or serve `/metrics`.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<SwitchboardSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(switchboard_settings::settings_path);
        let mut settings = switchboard_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.log_json {
            settings.logging.json = true;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    switchboard_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let room = ChatRoom::new();
    let hub = Hub::new(HubConfig::from(&settings.hub), room.clone());
    room.attach(hub.clone());

    let mut server = SwitchboardServer::new(ServerConfig::from(&settings.server), hub);
    if !cli.no_metrics {
        let handle = switchboard_server::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("Failed to start server")?;
    tracing::info!(
        %addr,
        ws_path = %settings.server.ws_path,
        send_queue = settings.hub.send_queue_capacity,
        "switchboard ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop().await;
    let outcome = server.shutdown().drain(vec![handle], SHUTDOWN_TIMEOUT).await;
    if outcome != DrainOutcome::Completed {
        tracing::warn!(?outcome, "listener did not stop in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
