//! Configuration system for the Parley client engine.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/parley/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::connection::RetryPolicy;
use crate::session::SessionOptions;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    sync: SyncFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    ws_url: Option<String>,
    api_url: Option<String>,
    user_id: Option<String>,
    connect_timeout_secs: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    page_limit: Option<usize>,
    event_buffer: Option<usize>,
    typing_timeout_secs: Option<u64>,
    send_stale_after_secs: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// WebSocket URL of the live event stream.
    pub ws_url: Option<String>,
    /// Base URL of the HTTP API.
    pub api_url: Option<String>,
    /// Authenticated identity.
    pub user_id: Option<String>,
    /// Timeout for establishing the WebSocket connection.
    pub connect_timeout: Duration,

    // -- Sync engine --
    /// History page size.
    pub page_limit: usize,
    /// Event channel buffer size.
    pub event_buffer: usize,
    /// Typing indicator expiry.
    pub typing_timeout: Duration,
    /// Age after which an unconfirmed send is reported as stale.
    pub send_stale_after: Duration,
    /// Reconnection policy.
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            api_url: None,
            user_id: None,
            connect_timeout: Duration::from_secs(10),
            page_limit: 20,
            event_buffer: 64,
            typing_timeout: Duration::from_secs(3),
            send_stale_after: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Separated from `load()` to enable
    /// unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            ws_url: cli.ws_url.clone().or_else(|| file.server.ws_url.clone()),
            api_url: cli.api_url.clone().or_else(|| file.server.api_url.clone()),
            user_id: cli.user_id.clone().or_else(|| file.server.user_id.clone()),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            page_limit: file.sync.page_limit.unwrap_or(defaults.page_limit),
            event_buffer: file.sync.event_buffer.unwrap_or(defaults.event_buffer),
            typing_timeout: file
                .sync
                .typing_timeout_secs
                .map_or(defaults.typing_timeout, Duration::from_secs),
            send_stale_after: file
                .sync
                .send_stale_after_secs
                .map_or(defaults.send_stale_after, Duration::from_secs),
            retry: RetryPolicy {
                max_attempts: file
                    .sync
                    .reconnect_max_attempts
                    .unwrap_or(defaults.retry.max_attempts),
                base_delay: file
                    .sync
                    .reconnect_base_delay_ms
                    .map_or(defaults.retry.base_delay, Duration::from_millis),
                max_delay: file
                    .sync
                    .reconnect_max_delay_secs
                    .map_or(defaults.retry.max_delay, Duration::from_secs),
            },
        }
    }

    /// Build [`SessionOptions`] from this configuration.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            page_limit: self.page_limit,
            typing_timeout: self.typing_timeout,
            send_stale_after: self.send_stale_after,
            event_buffer: self.event_buffer,
            retry: self.retry.clone(),
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Parley sync engine headless client")]
pub struct CliArgs {
    /// WebSocket URL of the live event stream.
    #[arg(long, env = "PARLEY_WS_URL")]
    pub ws_url: Option<String>,

    /// Base URL of the HTTP API.
    #[arg(long, env = "PARLEY_API_URL")]
    pub api_url: Option<String>,

    /// Your identity string.
    #[arg(long, env = "PARLEY_USER_ID")]
    pub user_id: Option<String>,

    /// Path to config file (default: `~/.config/parley/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PARLEY_LOG")]
    pub log_level: String,

    /// Path to a log file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("parley").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
