//! Cross-platform path utilities for printmon.
//!
//! Single source of truth for where the daemon keeps its configuration and
//! where the host-facing event socket lives.
//!
//! # Platform Behavior
//!
//! | Platform | Config Directory | Socket Directory |
//! |----------|------------------|------------------|
//! | Linux    | `~/.config/printmon` | `$XDG_RUNTIME_DIR` or data dir |
//! | macOS    | `~/Library/Application Support/printmon` | Same as data dir |
//! | Windows  | `%APPDATA%/printmon` | Data dir |

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

/// Errors specific to path operations.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not determine data directory")]
    NoDataDirectory,

    #[error("Could not determine config directory")]
    NoConfigDirectory,
}

/// Application identifier used in path construction.
const APP_NAME: &str = "printmon";

/// Socket file name for host event ingestion.
const EVENT_SOCKET_NAME: &str = "printmon_events.sock";

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Create `dir` (and parents) if missing, owner-only on Unix.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o700);
        fs::set_permissions(dir, perms)
            .with_context(|| format!("Failed to set permissions on {}", dir.display()))?;
    }

    Ok(())
}

/// Get the application data directory.
///
/// Creates the directory if it doesn't exist with secure permissions (0o700).
///
/// # Errors
/// Returns an error if the directory cannot be determined or created.
pub fn get_data_dir() -> Result<PathBuf> {
    let base_dir = dirs::data_dir().ok_or(PathError::NoDataDirectory)?;
    let data_dir = base_dir.join(APP_NAME);
    ensure_private_dir(&data_dir)?;
    Ok(data_dir)
}

/// Get the socket directory.
///
/// On Linux `$XDG_RUNTIME_DIR` is preferred; every other platform (and Linux
/// without a runtime dir) uses the data directory.
pub fn get_socket_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Some(runtime_dir) = dirs::runtime_dir() {
            if runtime_dir.exists() {
                return Ok(runtime_dir);
            }
        }
    }

    get_data_dir()
}

/// Get the path of the socket the host shim writes events to.
pub fn get_event_socket_path() -> Result<PathBuf> {
    let socket_dir = get_socket_dir()?;
    Ok(socket_dir.join(EVENT_SOCKET_NAME))
}

/// Get the configuration directory.
///
/// # Platform Behavior
/// - **Linux**: `~/.config/printmon`
/// - **macOS / Windows**: the data directory
pub fn get_config_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let config_base = dirs::config_dir().ok_or(PathError::NoConfigDirectory)?;
        let config_dir = config_base.join(APP_NAME);
        ensure_private_dir(&config_dir)?;
        Ok(config_dir)
    }

    #[cfg(not(target_os = "linux"))]
    {
        get_data_dir()
    }
}

/// Get the path of the daemon configuration file.
pub fn get_config_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Set secure Unix socket permissions (0o600). No-op on other platforms.
#[cfg(unix)]
pub fn secure_socket_permissions(socket_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if socket_path.exists() {
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(socket_path, perms).with_context(|| {
            format!(
                "Failed to set socket permissions: {}",
                socket_path.display()
            )
        })?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn secure_socket_permissions(_socket_path: &Path) -> Result<()> {
    Ok(())
}
