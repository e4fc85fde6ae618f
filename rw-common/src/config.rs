//! Configuration loading and database path resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Database file name inside the data folder
pub const DATABASE_FILE_NAME: &str = "rainwave.db";

/// Contents of `config.toml`
///
/// Every field is optional; an absent file behaves like an empty one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Explicit database file path
    pub database: Option<PathBuf>,
    /// Capacity of the schedule event channel
    pub event_capacity: Option<usize>,
    /// Stations the scheduler drives
    #[serde(default)]
    pub stations: Vec<i64>,
    /// Seconds between scheduler ticks
    pub tick_secs: Option<u64>,
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load from an explicit path, or the platform default location
    ///
    /// A missing or unreadable file is not fatal: a warning is logged and
    /// defaults are used.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Ok(path) => path,
                Err(e) => {
                    warn!("No configuration file loaded: {}", e);
                    return Self::default();
                }
            },
        };

        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default configuration ({}): {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Database path resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.database {
        return path.clone();
    }

    get_default_data_folder().join(DATABASE_FILE_NAME)
}

/// Get default configuration file path for the platform
fn default_config_path() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("rainwave").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/rainwave/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default data folder
fn get_default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/rainwave (or /var/lib/rainwave for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("rainwave"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/rainwave"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("rainwave"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/rainwave"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("rainwave"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\rainwave"))
    } else {
        PathBuf::from("./rainwave_data")
    }
}
