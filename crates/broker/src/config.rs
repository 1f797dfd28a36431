//! Configuration management for the ptyhub broker.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/ptyhub/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("bind must be a socket address like 0.0.0.0:8000, got {0}")]
    InvalidBindAddress(String),

    #[error("shell not found: {0}")]
    InvalidShellPath(String),

    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("buffer_chunks must be greater than 0")]
    InvalidBufferChunks,

    #[error("read_chunk_size must be between 1 and 65536 bytes, got {0}")]
    InvalidReadChunkSize(usize),

    #[error("poll_interval_ms must be between 10 and 1000, got {0}")]
    InvalidPollInterval(u64),

    #[error("staleness_timeout_secs must be greater than 0")]
    InvalidStalenessTimeout,

    #[error("reaper interval_secs must be greater than 0")]
    InvalidReaperInterval,
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the ptyhub broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Process-level settings.
    pub daemon: DaemonConfig,

    /// HTTP listener and authorization gate.
    pub server: ServerConfig,

    /// Shell launching and per-session buffering.
    pub session: SessionConfig,

    /// Stale session reaping and termination timing.
    pub reaper: ReaperConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily rolling log files. Logs go to stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    pub bind: String,

    /// Identity allowed to use the API. Everyone is allowed when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Request headers carrying the caller's identity, in lookup order.
    pub identity_headers: Vec<String>,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell started for every session.
    pub shell: String,

    /// Value of `TERM` in the shell's environment.
    pub term: String,

    /// `HOME` for shells when the broker's own is unset, empty or `/`.
    pub home_fallback: PathBuf,

    /// Default working directory, relative to `HOME`.
    pub workspace_dir: PathBuf,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Output chunks buffered per session before the oldest is dropped.
    pub buffer_chunks: usize,

    /// Maximum bytes per PTY read.
    pub read_chunk_size: usize,

    /// Upper bound on one output pump wait, in milliseconds.
    pub poll_interval_ms: u64,
}

/// Reaper and termination timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaperConfig {
    /// Seconds without an output drain after which a session is terminated.
    pub staleness_timeout_secs: u64,

    /// Seconds between reaper scans.
    pub interval_secs: u64,

    /// Seconds a shell gets to exit after the hangup before it is killed.
    pub grace_period_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            owner: None,
            identity_headers: vec![
                "X-Forwarded-Email".to_string(),
                "X-Forwarded-User".to_string(),
                "X-Databricks-User-Email".to_string(),
            ],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            term: "xterm-256color".to_string(),
            home_fallback: default_home_fallback(),
            workspace_dir: PathBuf::from("projects"),
            max_sessions: 128,
            buffer_chunks: 1000,
            read_chunk_size: 4096,
            poll_interval_ms: 100,
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            staleness_timeout_secs: 60,
            interval_secs: 30,
            grace_period_secs: 3,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ptyhub")
        .join("config.toml")
}

/// Returns the default shell: `$SHELL`, or `/bin/sh`.
fn default_shell() -> String {
    match std::env::var("SHELL") {
        Ok(shell) if !shell.is_empty() => shell,
        _ => "/bin/sh".to_string(),
    }
}

fn default_home_fallback() -> PathBuf {
    std::env::temp_dir().join("ptyhub")
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// A setting replaced by an environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
    pub setting: &'static str,
    pub value: String,
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PTYHUB_BIND: Override the HTTP listen address
    /// - PTYHUB_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - PTYHUB_OWNER: Override the identity allowed to use the API
    ///
    /// Returns what was overridden. Logging is usually not set up yet at this
    /// point, so the caller reports them after `logging::init`.
    pub fn apply_env_overrides(&mut self) -> Vec<EnvOverride> {
        let mut applied = Vec::new();

        if let Some(bind) = non_empty_env("PTYHUB_BIND") {
            self.server.bind = bind.clone();
            applied.push(EnvOverride { setting: "bind", value: bind });
        }

        if let Some(level) = non_empty_env("PTYHUB_LOG_LEVEL") {
            self.daemon.log_level = level.clone();
            applied.push(EnvOverride { setting: "log_level", value: level });
        }

        if let Some(owner) = non_empty_env("PTYHUB_OWNER") {
            self.server.owner = Some(owner.clone());
            applied.push(EnvOverride { setting: "owner", value: owner });
        }

        applied
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.bind_addr().is_none() {
            return Err(ConfigError::InvalidBindAddress(self.server.bind.clone()));
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

        if self.session.max_sessions < 1 || self.session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.buffer_chunks == 0 {
            return Err(ConfigError::InvalidBufferChunks);
        }

        if self.session.read_chunk_size < 1 || self.session.read_chunk_size > 65536 {
            return Err(ConfigError::InvalidReadChunkSize(self.session.read_chunk_size));
        }

        if self.session.poll_interval_ms < 10 || self.session.poll_interval_ms > 1000 {
            return Err(ConfigError::InvalidPollInterval(self.session.poll_interval_ms));
        }

        if self.reaper.staleness_timeout_secs == 0 {
            return Err(ConfigError::InvalidStalenessTimeout);
        }

        if self.reaper.interval_secs == 0 {
            return Err(ConfigError::InvalidReaperInterval);
        }

        Ok(())
    }

    /// Parsed HTTP listen address, `None` if `server.bind` is malformed.
    pub fn bind_addr(&self) -> Option<SocketAddr> {
        self.server.bind.parse().ok()
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

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
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
