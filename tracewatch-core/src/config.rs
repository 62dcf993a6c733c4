//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/tracewatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tracewatch/` (~/.config/tracewatch/)
//! - State/Logs: `$XDG_STATE_HOME/tracewatch/` (~/.local/state/tracewatch/)

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::channel::ChannelTiming;
use crate::error::{Error, Result};

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

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Monitored server endpoints
    #[serde(default)]
    pub server: ServerConfig,

    /// Channel timing overrides
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Endpoints of the monitored server's diagnostic feeds
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// WebSocket base URL (e.g. `ws://localhost:8080/admin/trace`)
    pub base_url: Option<String>,

    /// Trace-sampling feed, relative to `base_url`
    #[serde(default = "default_sampling_path")]
    pub sampling_path: String,

    /// Request-rate feed, relative to `base_url`
    #[serde(default = "default_rate_path")]
    pub rate_path: String,

    /// Task feed, relative to `base_url`
    #[serde(default = "default_tasks_path")]
    pub tasks_path: String,

    /// Liveness ping endpoint, relative to `base_url`
    #[serde(default = "default_ping_path")]
    pub ping_path: String,

    /// WebSocket subprotocol requested on every feed
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            sampling_path: default_sampling_path(),
            rate_path: default_rate_path(),
            tasks_path: default_tasks_path(),
            ping_path: default_ping_path(),
            subprotocol: default_subprotocol(),
        }
    }
}

fn default_sampling_path() -> String {
    "tracing".to_string()
}

fn default_rate_path() -> String {
    "sampling".to_string()
}

fn default_tasks_path() -> String {
    "tasks".to_string()
}

fn default_ping_path() -> String {
    "pingws".to_string()
}

fn default_subprotocol() -> String {
    "livetrace".to_string()
}

impl ServerConfig {
    /// URL of the trace-sampling feed.
    pub fn sampling_url(&self) -> Result<Url> {
        self.feed_url(&self.sampling_path)
    }

    /// URL of the request-rate feed.
    pub fn rate_url(&self) -> Result<Url> {
        self.feed_url(&self.rate_path)
    }

    /// URL of the task feed.
    pub fn tasks_url(&self) -> Result<Url> {
        self.feed_url(&self.tasks_path)
    }

    /// URL of the liveness ping endpoint.
    pub fn ping_url(&self) -> Result<Url> {
        self.feed_url(&self.ping_path)
    }

    fn feed_url(&self, path: &str) -> Result<Url> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("server.base_url is required".to_string()))?;
        let joined = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| Error::Config(format!("invalid feed URL {joined:?}: {e}")))
    }

    /// Validate configuration, returning an error message if invalid
    pub fn validate(&self) -> Result<()> {
        let Some(base) = self.base_url.as_deref() else {
            return Ok(());
        };
        if !base.starts_with("ws://") && !base.starts_with("wss://") {
            return Err(Error::Config(
                "server.base_url must use the ws:// or wss:// scheme".to_string(),
            ));
        }
        Url::parse(base).map_err(|e| Error::Config(format!("invalid server.base_url: {e}")))?;
        Ok(())
    }
}

/// Channel timing configuration
///
/// The defaults are the wire contract's fixed values; overrides exist for
/// test servers with different expectations.
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// Seconds between keep-alive messages while connected
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Seconds to wait before a reconnect attempt
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl ChannelConfig {
    pub fn timing(&self) -> ChannelTiming {
        ChannelTiming {
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }
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
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.server.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/tracewatch/config.toml` (~/.config/tracewatch/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tracewatch").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/tracewatch/` (~/.local/state/tracewatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tracewatch")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/tracewatch/tracewatch.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("tracewatch.log")
    }
}
