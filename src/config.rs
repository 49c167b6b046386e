//! Configuration management for PetLink
//!
//! Handles loading and parsing of the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::link::LinkConfig;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub link: LinkSettings,
}

/// Device-link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkSettings {
    /// Controller address (`host:port` or a full `ws://` URL)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Per-axis command throttle window, in milliseconds
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Deadline for each bootstrap fetch during connect, in milliseconds
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Deadline for command replies, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Deadline for a graceful close, in milliseconds
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            address: None,
            throttle_ms: default_throttle_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Link tuning derived from this configuration
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::default()
            .with_throttle_interval(Duration::from_millis(self.link.throttle_ms))
            .with_handshake_timeout(Duration::from_millis(self.link.handshake_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.link.request_timeout_ms))
            .with_disconnect_timeout(Duration::from_millis(self.link.disconnect_timeout_ms))
    }
}

// Default value functions
fn default_throttle_ms() -> u64 {
    50
}
fn default_handshake_timeout_ms() -> u64 {
    5000
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_disconnect_timeout_ms() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "link:\n  address: \"pet.local:8765\"").unwrap();

        let config = AppConfig::load(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(config.link.address.as_deref(), Some("pet.local:8765"));
        assert_eq!(config.link.throttle_ms, 50);
        assert_eq!(config.link.handshake_timeout_ms, 5000);
    }

    #[tokio::test]
    async fn test_load_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "link:\n  address: \"10.0.0.7:9000\"\n  throttle_ms: 25\n  request_timeout_ms: 1000"
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(config.link.throttle_ms, 25);
        assert_eq!(config.link.request_timeout_ms, 1000);

        let link = config.link_config();
        assert_eq!(link.throttle_interval, Duration::from_millis(25));
        assert_eq!(link.request_timeout, Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        assert!(AppConfig::load("/does/not/exist.yaml").await.is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.link.address.is_none());
        assert_eq!(config.link.disconnect_timeout_ms, 2000);
    }
}
