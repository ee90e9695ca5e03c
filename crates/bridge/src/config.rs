//! Configuration management for xterm-bridge.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/xterm-bridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{OverflowPolicy, SessionSettings, ShellConfig};
use crate::transport::RelayEndpoint;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than 0")]
    InvalidPort(&'static str),

    #[error("relay scheme must be ws or wss, got {0}")]
    InvalidScheme(String),

    #[error("flush_interval_ms must be between 1 and 60000, got {0}")]
    InvalidFlushInterval(u64),

    #[error("max_buffer_bytes must be greater than 0")]
    InvalidBufferSize,

    #[error("terminal size must be at least 1x1, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("shell not found: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Port used by both the inbound listener and the relay.
pub const DEFAULT_PORT: u16 = 10411;

/// Main configuration structure for xterm-bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Inbound HTTP listener.
    pub server: ServerConfig,

    /// Relay the sessions connect to.
    pub relay: RelayConfig,

    /// Shell and batching settings for each session.
    pub session: SessionConfig,
}

/// Inbound HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub listen_addr: String,

    /// Port to bind.
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Relay connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// `ws` or `wss`.
    pub scheme: String,

    /// Relay host. Empty means the container host, discovered at startup.
    pub host: String,

    pub port: u16,

    /// First path segment of the relay URL.
    pub path_prefix: String,

    /// Dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

/// Per-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell program to run.
    pub shell: String,

    /// Arguments for the shell.
    pub args: Vec<String>,

    /// Working directory for the shell.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Value of `TERM` for the shell.
    pub term: String,

    pub cols: u16,

    pub rows: u16,

    /// Output batching period in milliseconds.
    pub flush_interval_ms: u64,

    /// Cap on buffered output per session.
    pub max_buffer_bytes: usize,

    /// What to do when the buffer cap is hit.
    pub overflow: OverflowPolicy,

    /// How long to wait for the shell's first output before attaching.
    pub ready_timeout_ms: u64,

    /// Upper bound on each teardown step (final flush, close, kill).
    pub teardown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            scheme: "ws".to_string(),
            host: String::new(),
            port: DEFAULT_PORT,
            path_prefix: "container".to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let shell = ShellConfig::default();
        Self {
            shell: shell.program,
            args: shell.args,
            cwd: None,
            term: shell.term,
            cols: shell.cols,
            rows: shell.rows,
            flush_interval_ms: 100,
            max_buffer_bytes: 1024 * 1024, // 1MB
            overflow: OverflowPolicy::DropOldest,
            ready_timeout_ms: 2_000,
            teardown_timeout_ms: 2_000,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xterm-bridge")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - XTERM_BRIDGE_RELAY_HOST: Override relay host
    /// - XTERM_BRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("XTERM_BRIDGE_RELAY_HOST") {
            if !host.is_empty() {
                tracing::info!("Overriding relay host from environment: {}", host);
                self.relay.host = host;
            }
        }

        if let Ok(level) = std::env::var("XTERM_BRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort("server.port"));
        }
        if self.relay.port == 0 {
            return Err(ConfigError::InvalidPort("relay.port"));
        }

        if self.relay.scheme != "ws" && self.relay.scheme != "wss" {
            return Err(ConfigError::InvalidScheme(self.relay.scheme.clone()));
        }

        let flush = self.session.flush_interval_ms;
        if !(1..=60_000).contains(&flush) {
            return Err(ConfigError::InvalidFlushInterval(flush));
        }

        if self.session.max_buffer_bytes == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }

        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: self.session.cols,
                rows: self.session.rows,
            });
        }

        let shell_path = Path::new(&self.session.shell);
        let shell_found = if shell_path.is_absolute() {
            shell_path.exists()
        } else {
            which::which(&self.session.shell).is_ok()
        };
        if !shell_found {
            return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Settings handed to every session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            flush_interval: Duration::from_millis(self.session.flush_interval_ms),
            max_buffer_bytes: self.session.max_buffer_bytes,
            overflow: self.session.overflow,
            ready_timeout: Duration::from_millis(self.session.ready_timeout_ms),
            connect_timeout: Duration::from_millis(self.relay.connect_timeout_ms),
            teardown_timeout: Duration::from_millis(self.session.teardown_timeout_ms),
        }
    }

    /// Shell invocation for every session.
    pub fn shell_config(&self) -> ShellConfig {
        ShellConfig {
            program: self.session.shell.clone(),
            args: self.session.args.clone(),
            cwd: self.session.cwd.clone(),
            term: self.session.term.clone(),
            cols: self.session.cols,
            rows: self.session.rows,
        }
    }

    /// Relay endpoint, using `host` when no host is configured.
    pub fn relay_endpoint(&self, host: &str) -> RelayEndpoint {
        let host = if self.relay.host.is_empty() {
            host
        } else {
            &self.relay.host
        };
        RelayEndpoint {
            path_prefix: self.relay.path_prefix.clone(),
            ..RelayEndpoint::new(&self.relay.scheme, host, self.relay.port)
        }
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
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
