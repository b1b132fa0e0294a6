//! Configuration for the Quill print gateway

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuillConfig {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Print service connection
    #[serde(default)]
    pub cups: CupsConfig,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Socket path
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_level: default_log_level(),
        }
    }
}

/// Print service connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CupsConfig {
    /// Service host
    #[serde(default = "default_host")]
    pub host: String,

    /// Service port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Identity attached to requests when the caller does not supply one
    #[serde(default = "default_user")]
    pub user: String,
}

impl Default for CupsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
        }
    }
}

// Default value functions
fn default_socket_path() -> String {
    "/run/quill/quill.sock".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    631
}

fn default_user() -> String {
    "root".to_string()
}

impl QuillConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QuillConfig::default();
        assert_eq!(config.daemon.socket_path, "/run/quill/quill.sock");
        assert_eq!(config.cups.host, "localhost");
        assert_eq!(config.cups.port, 631);
        assert_eq!(config.cups.user, "root");
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: QuillConfig = toml::from_str("[cups]\nhost = \"10.0.0.5\"\n").unwrap();
        assert_eq!(config.cups.host, "10.0.0.5");
        assert_eq!(config.cups.port, 631);
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = QuillConfig::load(Path::new("/nonexistent/quill.toml")).unwrap();
        assert_eq!(config.cups.port, 631);
    }
}
