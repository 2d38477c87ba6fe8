//! Configuration management for the Sandfinder agent.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/sandfinder/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default streaming chunk size (10 MiB).
pub const DEFAULT_WATERMARK: usize = 10 * 1024 * 1024;

/// Largest streaming chunk that still fits a single protocol frame.
pub const MAX_WATERMARK: usize = 12 * 1024 * 1024;

/// Default cap for bounded reads (10 KiB).
pub const DEFAULT_READ_CAP: usize = 10 * 1024;

/// Largest accepted bounded read cap.
pub const MAX_READ_CAP: usize = 1024 * 1024;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("watermark must be between 1 and 12582912 bytes, got {0}")]
    InvalidWatermark(usize),

    #[error("read_cap must be between 1 and 1048576 bytes, got {0}")]
    InvalidReadCap(usize),

    #[error("channel_capacity must be between 1 and 4096, got {0}")]
    InvalidChannelCapacity(usize),

    #[error("bundle root must be an absolute path, got {0}")]
    InvalidBundleRoot(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Sandfinder agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General agent configuration.
    pub agent: AgentConfig,

    /// Root alias overrides.
    pub roots: RootsConfig,

    /// Transfer tuning.
    pub transfer: TransferConfig,
}

/// General agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for rolling log files. Logs go to stderr when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Root alias configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RootsConfig {
    /// Installation root for the `bundle` alias. Defaults to the directory
    /// holding the agent executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<PathBuf>,
}

/// Transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes requested per streaming read.
    pub watermark: usize,

    /// Maximum bytes returned by a bounded read.
    pub read_cap: usize,

    /// Outbound envelopes buffered before emitters wait.
    pub channel_capacity: usize,

    /// Compress outbound frames above the codec threshold.
    pub compression: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            watermark: DEFAULT_WATERMARK,
            read_cap: DEFAULT_READ_CAP,
            channel_capacity: 64,
            compression: true,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sandfinder")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - SANDFINDER_LOG_LEVEL: Override log level
    /// - SANDFINDER_BUNDLE_ROOT: Override the `bundle` root
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SANDFINDER_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.agent.log_level = level;
            }
        }

        if let Ok(root) = std::env::var("SANDFINDER_BUNDLE_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding bundle root from environment: {}", root);
                self.roots.bundle = Some(PathBuf::from(root));
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let transfer = &self.transfer;

        if transfer.watermark == 0 || transfer.watermark > MAX_WATERMARK {
            return Err(ConfigError::InvalidWatermark(transfer.watermark));
        }

        if transfer.read_cap == 0 || transfer.read_cap > MAX_READ_CAP {
            return Err(ConfigError::InvalidReadCap(transfer.read_cap));
        }

        if transfer.channel_capacity == 0 || transfer.channel_capacity > 4096 {
            return Err(ConfigError::InvalidChannelCapacity(
                transfer.channel_capacity,
            ));
        }

        if let Some(bundle) = &self.roots.bundle {
            if !bundle.is_absolute() {
                return Err(ConfigError::InvalidBundleRoot(
                    bundle.display().to_string(),
                ));
            }
        }

        let level = self.agent.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.agent.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.agent.log_level, "info");
        assert!(config.agent.log_dir.is_none());
        assert!(config.roots.bundle.is_none());
        assert_eq!(config.transfer.watermark, 10 * 1024 * 1024);
        assert_eq!(config.transfer.read_cap, 10 * 1024);
        assert_eq!(config.transfer.channel_capacity, 64);
        assert!(config.transfer.compression);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[agent]
log_level = "debug"
log_dir = "/var/log/sandfinder"

[roots]
bundle = "/opt/app"

[transfer]
watermark = 1048576
read_cap = 512
channel_capacity = 8
compression = false
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.agent.log_level, "debug");
        assert_eq!(
            config.agent.log_dir,
            Some(PathBuf::from("/var/log/sandfinder"))
        );
        assert_eq!(config.roots.bundle, Some(PathBuf::from("/opt/app")));
        assert_eq!(config.transfer.watermark, 1048576);
        assert_eq!(config.transfer.read_cap, 512);
        assert_eq!(config.transfer.channel_capacity, 8);
        assert!(!config.transfer.compression);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[agent\nlog_level = \"debug\"");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let result = Config::from_toml("[transfer]\nwatermark = \"big\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.agent.log_level = "warn".to_string();
        original.roots.bundle = Some(PathBuf::from("/opt/bundle"));
        original.transfer.watermark = 4096;

        let loaded = Config::from_toml(&original.to_toml().unwrap()).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.transfer.read_cap = 2048;

        original.save(&config_path).unwrap();
        assert_eq!(Config::load(&config_path).unwrap(), original);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("sandfinder"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_validate_watermark_bounds() {
        let mut config = Config::default();

        config.transfer.watermark = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidWatermark(0)));

        config.transfer.watermark = MAX_WATERMARK + 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidWatermark(MAX_WATERMARK + 1))
        );

        config.transfer.watermark = MAX_WATERMARK;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_read_cap_bounds() {
        let mut config = Config::default();
        config.transfer.read_cap = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidReadCap(0)));
    }

    #[test]
    fn test_validate_channel_capacity() {
        let mut config = Config::default();
        config.transfer.channel_capacity = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidChannelCapacity(0))
        );
    }

    #[test]
    fn test_validate_relative_bundle_root() {
        let mut config = Config::default();
        config.roots.bundle = Some(PathBuf::from("relative/app"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBundleRoot(_))
        ));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.agent.log_level = "DEBUG".to_string();
        assert_eq!(config.validate(), Ok(()));

        config.agent.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("SANDFINDER_LOG_LEVEL", "trace");
        std::env::set_var("SANDFINDER_BUNDLE_ROOT", "/opt/override");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.agent.log_level, "trace");
        assert_eq!(config.roots.bundle, Some(PathBuf::from("/opt/override")));

        std::env::remove_var("SANDFINDER_LOG_LEVEL");
        std::env::remove_var("SANDFINDER_BUNDLE_ROOT");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_is_ignored() {
        std::env::set_var("SANDFINDER_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.agent.log_level, "info");

        std::env::remove_var("SANDFINDER_LOG_LEVEL");
    }
}
