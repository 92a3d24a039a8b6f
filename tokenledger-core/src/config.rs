//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/tokenledger/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tokenledger/` (~/.config/tokenledger/)
//! - State/Logs: `$XDG_STATE_HOME/tokenledger/` (~/.local/state/tokenledger/)
//!
//! The usage database itself lives next to the proxy's auth files
//! (`~/.cli-proxy-api/usage.db` by default), not under an XDG directory.

use crate::error::{Error, Result};
use crate::usage::StatisticsToggle;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Expand a leading `~` to the home directory.
///
/// Only `~` on its own or followed by a separator is expanded; `~user` forms
/// are returned untouched.
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(std::path::Component::Normal(first)) if first == "~" => {
            let home = std::env::var_os("HOME")
                .map(PathBuf::from)
                .or_else(dirs::home_dir)
                .ok_or_else(|| {
                    Error::Config("failed to expand home directory: HOME is not set".to_string())
                })?;
            Ok(home.join(components.as_path()))
        }
        _ => Ok(path.to_path_buf()),
    }
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Usage database location and connection settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Usage statistics switch
    #[serde(default)]
    pub statistics: StatisticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Explicit database path; `~` is allowed
    pub path: Option<PathBuf>,

    /// Proxy auth directory; the database defaults to `<auth_dir>/usage.db`
    #[serde(default = "default_auth_dir")]
    pub auth_dir: PathBuf,

    /// How long to wait on a locked database before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            auth_dir: default_auth_dir(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StorageConfig {
    /// Busy timeout as a [`Duration`]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_auth_dir() -> PathBuf {
    PathBuf::from("~/.cli-proxy-api")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Statistics configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StatisticsConfig {
    /// Record usage events at all
    #[serde(default = "default_statistics_enabled")]
    pub enabled: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_statistics_enabled(),
        }
    }
}

fn default_statistics_enabled() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if matches!(&self.storage.path, Some(p) if p.as_os_str().is_empty()) {
            return Err(Error::Config(
                "storage.path must not be empty when set".to_string(),
            ));
        }
        if self.storage.path.is_none() && self.storage.auth_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "storage.auth_dir must not be empty".to_string(),
            ));
        }
        if self.storage.busy_timeout_ms == 0 {
            return Err(Error::Config(
                "storage.busy_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Push runtime switches into process-wide state.
    ///
    /// Safe to call again after a reload.
    pub fn apply_runtime(&self) {
        StatisticsToggle::global().set_enabled(self.statistics.enabled);
    }

    /// Returns the usage database path (tilde not yet expanded)
    ///
    /// `storage.path` when set, otherwise `<storage.auth_dir>/usage.db`.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| self.storage.auth_dir.join("usage.db"))
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/tokenledger/config.toml` (~/.config/tokenledger/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tokenledger").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/tokenledger/` (~/.local/state/tokenledger/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tokenledger")
    }
}
