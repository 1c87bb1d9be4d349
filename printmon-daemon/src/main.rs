//! printmon daemon
//!
//! Listens for host events on a Unix socket and serves the resulting printer
//! metrics over HTTP for Prometheus to scrape.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use printmon_daemon::ipc::EventServer;
use printmon_daemon::{server, Daemon, DaemonConfig};

#[derive(Parser, Debug)]
#[command(name = "printmon-daemon", version, about = "3D printer telemetry exporter")]
struct Args {
    /// Configuration file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address for the metrics endpoint, overrides the config file
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Host event socket path, overrides the config file
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(listen) = args.listen {
        config.listen_address = listen;
    }
    if let Some(socket) = args.socket {
        config.event_socket_path = socket;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    info!("Starting printmon daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config.config_path.display());

    let daemon = Arc::new(Daemon::new(&config).context("Failed to initialize daemon")?);
    daemon.publish_startup_info(&config.host_name);

    let event_server = EventServer::bind(&config.event_socket_path, Arc::clone(&daemon))
        .context("Failed to start event socket")?;
    let socket_path = event_server.socket_path().to_path_buf();

    let listener = TcpListener::bind(config.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_address))?;

    info!("printmon daemon ready");

    tokio::select! {
        result = event_server.run() => {
            if let Err(e) = result {
                error!("Event socket error: {}", e);
            }
        }
        result = server::serve(listener, daemon.store()) => {
            if let Err(e) = result {
                error!("Metrics server error: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down...");
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&socket_path) {
            error!("Failed to remove event socket: {}", e);
        }
    }
    info!("printmon daemon stopped");

    Ok(())
}
