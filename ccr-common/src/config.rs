//! Bootstrap configuration loading
//!
//! The TOML file only carries bootstrap concerns (listen address, database
//! location, scratch directories, logging). Service-specific sections are
//! layered on top by the service crate.
//!
//! # Config file priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `CCR_CONFIG` environment variable
//! 3. `~/.config/ccr/<module>.toml`
//! 4. Built-in defaults (missing file is not an error)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CCR_CONFIG";

/// Bootstrap configuration shared by every CCR binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address the HTTP server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Parent directory for per-operation scratch checkouts
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Where rendered compliance reports are written (optional)
    #[serde(default)]
    pub reports_dir: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            database_path: default_database_path(),
            workspace_root: default_workspace_root(),
            reports_dir: None,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    5780
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("ccr.db")
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("ccr-workspaces")
}

/// OS-dependent data directory (`~/.local/share/ccr` on Linux)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ccr"))
        .unwrap_or_else(|| PathBuf::from("./ccr_data"))
}

/// Resolve which config file to read, if any
///
/// Returns `None` when no explicit path was given and the per-user default
/// does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>, module_name: &str) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("ccr").join(format!("{}.toml", module_name)))?;
    if user_config.exists() {
        Some(user_config)
    } else {
        None
    }
}

/// Load a TOML config file into `T`, falling back to `T::default()`
///
/// A missing file logs a warning and yields defaults. A file that exists but
/// fails to parse is a configuration error.
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using built-in defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
