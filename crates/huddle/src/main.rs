//! # huddle
//!
//! Presence hub binary. `huddle serve` runs the hub; `huddle chat` joins one
//! from a terminal.

#![deny(unsafe_code)]

mod chat;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use huddle_server::{HuddleServer, ServerConfig};
use huddle_settings::HuddleSettings;

/// Presence and messaging hub.
#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Presence and messaging hub")]
struct Cli {
    /// Log filter (e.g. `info`, `huddle_server=debug`). `RUST_LOG` wins.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hub.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,

        /// Liveness sweep period in milliseconds.
        #[arg(long)]
        sweep_interval_ms: Option<u64>,

        /// Do not install the Prometheus recorder.
        #[arg(long)]
        no_metrics: bool,
    },
    /// Join a hub from this terminal.
    Chat {
        /// Display name to claim.
        #[arg(long)]
        name: String,

        /// Hub base URL (e.g. `http://localhost:3000`).
        #[arg(long)]
        server: Option<String>,

        /// Do not reconnect after an unexpected disconnect.
        #[arg(long)]
        no_reconnect: bool,
    },
}

impl Cli {
    /// Apply command-line flags over loaded settings.
    fn apply(&self, settings: &mut HuddleSettings) {
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        match &self.command {
            Command::Serve {
                host,
                port,
                sweep_interval_ms,
                ..
            } => {
                if let Some(host) = host {
                    settings.server.host.clone_from(host);
                }
                if let Some(port) = port {
                    settings.server.port = *port;
                }
                if let Some(ms) = sweep_interval_ms {
                    settings.server.sweep_interval_ms = (*ms).max(1);
                }
            }
            Command::Chat {
                server,
                no_reconnect,
                ..
            } => {
                if let Some(server) = server {
                    settings.client.server_url.clone_from(server);
                }
                if *no_reconnect {
                    settings.client.reconnect.enabled = false;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut settings, load_error) = match huddle_settings::load_settings() {
        Ok(settings) => (settings, None),
        Err(e) => (HuddleSettings::default(), Some(e)),
    };
    cli.apply(&mut settings);

    logging::init_subscriber(&settings.logging.level, settings.logging.json);
    if let Some(e) = load_error {
        tracing::warn!(path = %huddle_settings::settings_path().display(), "using default settings: {e}");
    }
    if huddle_settings::init_settings(settings).is_err() {
        tracing::debug!("global settings already initialized");
    }
    let settings = huddle_settings::get_settings();

    match cli.command {
        Command::Serve { no_metrics, .. } => serve(settings, no_metrics).await,
        Command::Chat { ref name, .. } => chat::run(&settings.client, name).await,
    }
}

async fn serve(settings: &HuddleSettings, no_metrics: bool) -> Result<()> {
    let metrics = if no_metrics {
        None
    } else {
        match huddle_server::metrics::install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "metrics disabled");
                None
            }
        }
    };

    let config = ServerConfig::from(&settings.server);
    let server = HuddleServer::new(config, metrics);
    let (addr, handles) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("huddle listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(handles.into_vec(), None)
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}
