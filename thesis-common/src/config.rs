//! Bootstrap configuration and root folder resolution
//!
//! The worker reads a small TOML file at startup. Everything in it is optional:
//! a missing file is not an error, the worker logs a warning and runs on defaults.
//!
//! # Root folder priority
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Application directory name used under the platform config/data directories
pub const APP_DIR: &str = "thesis";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Root folder holding the SQLite database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,

    /// HTTP port for the job surface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// API key for the text generation service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_api_key: Option<String>,

    /// Model name for the text generation service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_model: Option<String>,

    /// API key for the detectability scoring service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector_api_key: Option<String>,

    /// Base URL of the literature search service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_base_url: Option<String>,

    /// Contact address sent to the literature search service (polite pool)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,

    /// Base URL of the document index service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_base_url: Option<String>,

    /// Document store identifier inside the index service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_store_id: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Pipeline tuning table, interpreted by the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<toml::Table>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
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

fn default_log_level() -> String {
    "info".to_string()
}

/// Load TOML configuration from `path`
///
/// A missing file yields `TomlConfig::default()` with a warning. A file that exists
/// but does not parse is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Write TOML configuration atomically (temp file + rename)
///
/// On Unix the file is restricted to 0600 since it may hold API keys.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Default TOML config path for the worker
/// (`~/.config/thesis/thesis-worker.toml` on Linux)
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR).join("thesis-worker.toml"))
        .unwrap_or_else(|| PathBuf::from("thesis-worker.toml"))
}

/// Resolve the root folder
///
/// Priority: CLI argument → environment variable → TOML → OS default.
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./thesis_data"))
}

/// Create the root folder if missing and return the database path inside it
pub fn ensure_root_folder(root_folder: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root_folder).map_err(|e| {
        Error::Config(format!(
            "Failed to create root folder {}: {}",
            root_folder.display(),
            e
        ))
    })?;
    Ok(root_folder.join("thesis.db"))
}

/// Standard User-Agent for outbound HTTP clients
pub fn get_user_agent() -> String {
    format!("thesis-worker/{}", env!("CARGO_PKG_VERSION"))
}
