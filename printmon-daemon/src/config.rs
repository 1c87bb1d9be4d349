//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::ControllerConfig;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Address the scrape endpoint listens on
    pub listen_address: SocketAddr,

    /// Unix socket the host shim writes events to
    pub event_socket_path: PathBuf,

    /// Seconds a finished job's values stay exported before teardown
    pub teardown_delay_secs: u64,

    /// Seconds a finished slice's progress stays exported
    pub slice_teardown_delay_secs: u64,

    /// Host name reported in server info until the host sends its own
    pub host_name: String,

    /// Sample the host core temperature on each temperature report
    pub core_temperature: bool,

    /// Log filter used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9180)),
            event_socket_path: printmon_paths::get_event_socket_path()
                .unwrap_or_else(|_| std::env::temp_dir().join("printmon_events.sock")),
            teardown_delay_secs: 30,
            slice_teardown_delay_secs: 30,
            host_name: "OctoPrint".to_string(),
            core_temperature: true,
            log_level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default location, or create it
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path())
    }

    /// Load configuration from `config_path`, writing defaults there if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

            let mut config: DaemonConfig =
                toml::from_str(&contents).context("Failed to parse config file")?;

            config.config_path = config_path.to_path_buf();
            Ok(config)
        } else {
            let config = Self {
                config_path: config_path.to_path_buf(),
                ..Self::default()
            };
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            teardown_delay: Duration::from_secs(self.teardown_delay_secs),
            slice_teardown_delay: Duration::from_secs(self.slice_teardown_delay_secs),
        }
    }

    fn default_config_path() -> PathBuf {
        printmon_paths::get_config_file_path()
            .unwrap_or_else(|_| PathBuf::from(".").join("printmon.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen_address.port(), 9180);
        assert!(config.listen_address.ip().is_loopback());
        assert_eq!(config.teardown_delay_secs, 30);
        assert_eq!(config.host_name, "OctoPrint");
        assert!(config.event_socket_path.ends_with("printmon_events.sock"));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = DaemonConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.config_path, path);

        let reloaded = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.listen_address, config.listen_address);
        assert_eq!(reloaded.event_socket_path, config.event_socket_path);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "listen_address = \"0.0.0.0:9999\"\nteardown_delay_secs = 5\n",
        )
        .unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.listen_address.port(), 9999);
        assert_eq!(config.teardown_delay_secs, 5);
        assert_eq!(config.slice_teardown_delay_secs, 30);
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.controller_config().teardown_delay,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listen_address = 12").unwrap();

        assert!(DaemonConfig::load_from(&path).is_err());
    }
}
