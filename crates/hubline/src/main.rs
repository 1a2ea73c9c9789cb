//! # hubline
//!
//! Server binary: loads settings, initializes logging and metrics, serves
//! the demo `Chat` hub until Ctrl-C.

#![deny(unsafe_code)]

mod chat;
mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use hubline_server::HubServer;
use hubline_settings::HublineSettings;
use hubline_logging::LogLevel;
use tokio::task::JoinHandle;
use tracing::info;

/// How long to wait for the listener and open connections after the shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time hub server.
#[derive(Parser, Debug)]
#[command(name = "hubline", about = "Real-time hub server", version)]
struct Cli {
    /// Settings file (defaults to `$HUBLINE_SETTINGS` or `~/.hubline/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Minimum log level (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut HublineSettings) -> Result<()> {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            let Some(level) = hubline_settings::loader::parse_log_level(level) else {
                bail!("unknown log level '{level}'");
            };
            settings.logging.level = level;
        }
        Ok(())
    }
}

fn load(args: &Cli) -> Result<HublineSettings> {
    let path = args
        .settings
        .clone()
        .unwrap_or_else(hubline_settings::settings_path);
    let mut settings = hubline_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings)?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load(&args)?;

    let _ = hubline_logging::init_subscriber(&settings.logging);
    if let Err(e) = serve(&settings).await {
        hubline_logging::log(LogLevel::Fatal, "hubline stopped", Some(e.as_ref()));
        return Err(e);
    }
    Ok(())
}

async fn serve(settings: &HublineSettings) -> Result<()> {
    let metrics = hubline_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = HubServer::new(
        config::server_config(settings),
        config::hub_options(settings),
    )
    .with_hub(chat::hub())
    .with_metrics(metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!(%addr, "hubline listening (hub: /chat)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!(connections = server.connection_count(), "shutting down");
    let _ = drain(&server, handle, SHUTDOWN_TIMEOUT).await;
    info!("shutdown complete");
    Ok(())
}

/// Stop the listener and every connection, waiting up to `timeout`.
async fn drain(server: &HubServer, listener: JoinHandle<()>, timeout: Duration) -> bool {
    let finished = server
        .shutdown()
        .graceful_shutdown(vec![listener], Some(timeout))
        .await;
    if !finished {
        hubline_logging::log(
            LogLevel::Warning,
            &format!("connections still open after {timeout:?}"),
            None,
        );
    }
    finished
}
