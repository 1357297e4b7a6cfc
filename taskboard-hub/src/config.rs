//! Configuration for the task board sync hub.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard-hub/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use crate::upload::DEFAULT_MAX_UPLOAD_SIZE;

/// Errors that can occur when loading hub configuration.
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

/// Top-level TOML config file structure for the hub.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubConfigFile {
    server: ServerFileConfig,
    uploads: UploadsFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
}

/// `[uploads]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UploadsFileConfig {
    dir: Option<PathBuf>,
    max_upload_size: Option<usize>,
}

/// CLI arguments for the hub.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task board sync hub")]
pub struct HubCliArgs {
    /// Address to bind the hub to.
    #[arg(short, long, env = "TASKBOARD_HUB_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/taskboard-hub/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory uploaded attachments are written to.
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Maximum upload request size in bytes.
    #[arg(long)]
    pub max_upload_size: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_HUB_LOG")]
    pub log_level: String,
}

/// Fully resolved hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind to (e.g. `0.0.0.0:3001`).
    pub bind_addr: String,
    /// Upload directory.
    pub upload_dir: PathBuf,
    /// Maximum upload request size in bytes.
    pub max_upload_size: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".to_string(),
            upload_dir: PathBuf::from("uploads"),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl HubConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// An explicit `--config` that does not exist is an error; a missing
    /// default file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &HubCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &HubCliArgs, file: HubConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            upload_dir: cli
                .upload_dir
                .clone()
                .or(file.uploads.dir)
                .unwrap_or(defaults.upload_dir),
            max_upload_size: cli
                .max_upload_size
                .or(file.uploads.max_upload_size)
                .unwrap_or(defaults.max_upload_size),
            log_level: cli.log_level.clone(),
        }
    }
}

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<HubConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(HubConfigFile::default());
    };
    let path = config_dir.join("taskboard-hub").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HubConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
