//! Unix socket listener for host events

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::daemon::Daemon;
use crate::events::HostEvent;

/// Longest event line accepted; longer lines are discarded up to their newline.
pub const MAX_EVENT_LINE_BYTES: u64 = 64 * 1024;

/// Accepts host shim connections and feeds their events to the daemon
pub struct EventServer {
    listener: UnixListener,
    socket_path: PathBuf,
    daemon: Arc<Daemon>,
}

impl EventServer {
    /// Bind the event socket, replacing a stale one
    pub fn bind(socket_path: &Path, daemon: Arc<Daemon>) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("Failed to remove stale event socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("Failed to bind event socket")?;
        printmon_paths::secure_socket_permissions(socket_path)?;

        info!(
            "Event socket listening on {} (permissions: 0600)",
            socket_path.display()
        );

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            daemon,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .context("Failed to accept connection")?;

            let daemon = Arc::clone(&self.daemon);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, daemon).await {
                    error!("Event connection error: {}", e);
                }
            });
        }
    }
}

/// Read newline-delimited events until the host closes the connection
pub async fn handle_connection(stream: UnixStream, daemon: Arc<Daemon>) -> Result<()> {
    debug!("Host connected to event socket");
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        let n = (&mut reader)
            .take(MAX_EVENT_LINE_BYTES)
            .read_until(b'\n', &mut buffer)
            .await
            .context("Failed to read event")?;
        if n == 0 {
            break;
        }

        if !buffer.ends_with(b"\n") && n as u64 == MAX_EVENT_LINE_BYTES {
            warn!("Skipping event longer than {} bytes", MAX_EVENT_LINE_BYTES);
            skip_rest_of_line(&mut reader).await?;
            continue;
        }

        let line = String::from_utf8_lossy(&buffer);
        if line.trim().is_empty() {
            continue;
        }

        match HostEvent::from_json_line(&line) {
            Ok(event) => daemon.handle_event(event),
            Err(e) => warn!("Skipping malformed event ({}): {}", e, line.trim()),
        }
    }

    debug!("Host disconnected from event socket");
    Ok(())
}

async fn skip_rest_of_line(reader: &mut BufReader<UnixStream>) -> Result<()> {
    loop {
        let available = reader.fill_buf().await.context("Failed to read event")?;
        if available.is_empty() {
            return Ok(());
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}
