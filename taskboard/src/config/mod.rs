//! Configuration system for the `taskboard` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use taskboard_proto::task::{Category, Column, Priority};

use crate::client::SyncConfig;
use crate::upload::DEFAULT_UPLOAD_TIMEOUT;

/// Default hub WebSocket endpoint.
pub const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:3001/ws";

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

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    sync: SyncFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    hub_url: Option<String>,
    upload_url: Option<String>,
    upload_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    snapshot_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    confirm_timeout_secs: Option<u64>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_secs: Option<u64>,
    max_attempts: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Backoff schedule for reconnecting after the hub connection drops.
///
/// The first attempt waits `initial_delay`; each further attempt doubles the
/// wait up to `max_delay`. After `max_attempts` failures the client gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Wait before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the wait between attempts.
    pub max_delay: Duration,
    /// Attempts before giving up. Zero disables reconnecting.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Wait before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub WebSocket URL.
    pub hub_url: String,
    /// Upload endpoint; derived from `hub_url` when unset.
    pub upload_url: Option<String>,
    /// Limit on one attachment upload request.
    pub upload_timeout: Duration,
    /// Timeout for opening the WebSocket.
    pub connect_timeout: Duration,
    /// Timeout for the initial snapshot after connecting.
    pub snapshot_timeout: Duration,
    /// Capacity of the board event channel.
    pub channel_capacity: usize,
    /// How long to wait for the hub to confirm a create.
    pub confirm_timeout: Duration,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            upload_url: None,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            snapshot_timeout: Duration::from_secs(5),
            channel_capacity: 256,
            confirm_timeout: Duration::from_secs(8),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// or if any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            hub_url: cli
                .hub_url
                .clone()
                .or(file.network.hub_url)
                .unwrap_or(defaults.hub_url),
            upload_url: cli.upload_url.clone().or(file.network.upload_url),
            upload_timeout: file
                .network
                .upload_timeout_secs
                .map_or(defaults.upload_timeout, Duration::from_secs),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            snapshot_timeout: file
                .network
                .snapshot_timeout_secs
                .map_or(defaults.snapshot_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            confirm_timeout: file
                .sync
                .confirm_timeout_secs
                .map_or(defaults.confirm_timeout, Duration::from_secs),
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_secs
                    .map_or(defaults.reconnect.max_delay, Duration::from_secs),
                max_attempts: file
                    .reconnect
                    .max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
            },
        }
    }

    /// Connection settings for [`crate::client::BoardClient::connect`].
    #[must_use]
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            hub_url: self.hub_url.clone(),
            connect_timeout: self.connect_timeout,
            snapshot_timeout: self.snapshot_timeout,
            confirm_timeout: self.confirm_timeout,
            channel_capacity: self.channel_capacity,
            reconnect: self.reconnect.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Real-time task board client")]
pub struct CliArgs {
    /// WebSocket URL of the sync hub.
    #[arg(long, env = "TASKBOARD_HUB_URL", global = true)]
    pub hub_url: Option<String>,

    /// Attachment upload endpoint (default: derived from the hub URL).
    #[arg(long, global = true)]
    pub upload_url: Option<String>,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_LOG", global = true)]
    pub log_level: String,

    /// Log file path (default: `<tmp>/taskboard.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// What to do; defaults to `list`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Board operations.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the board grouped by column.
    List,
    /// Print the board, then every change as it happens.
    Watch,
    /// Create a task.
    Add {
        /// Task title.
        title: String,
        /// Longer description.
        #[arg(long)]
        description: Option<String>,
        /// low, medium or high.
        #[arg(long)]
        priority: Option<Priority>,
        /// todo, in-prog or done.
        #[arg(long)]
        column: Option<Column>,
        /// work, personal, bug, feature or research.
        #[arg(long)]
        category: Option<Category>,
        /// Image or PDF to attach once the task exists.
        #[arg(long)]
        attach: Option<PathBuf>,
    },
    /// Change fields of a task.
    Edit {
        /// Task id or unique id prefix.
        id: String,
        /// New title.
        #[arg(long)]
        title: Option<String>,
        /// New description.
        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,
        /// Remove the description.
        #[arg(long)]
        clear_description: bool,
        /// New priority.
        #[arg(long)]
        priority: Option<Priority>,
        /// New column.
        #[arg(long)]
        column: Option<Column>,
        /// New category.
        #[arg(long, conflicts_with = "clear_category")]
        category: Option<Category>,
        /// Remove the category.
        #[arg(long)]
        clear_category: bool,
        /// Image or PDF to attach.
        #[arg(long)]
        attach: Option<PathBuf>,
    },
    /// Move a task to another column.
    Move {
        /// Task id or unique id prefix.
        id: String,
        /// Target column: todo, in-prog or done.
        column: Column,
    },
    /// Delete a task.
    Delete {
        /// Task id or unique id prefix.
        id: String,
    },
    /// Attach an image or PDF to a task.
    Attach {
        /// Task id or unique id prefix.
        id: String,
        /// File to upload.
        file: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("taskboard").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
