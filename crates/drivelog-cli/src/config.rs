//! Configuration file management.
//!
//! The CLI shares its config file with the engine: CLI keys live at the top
//! level next to the engine's `[location]`, `[tracking]`, `[address]`,
//! `[background]` and `[session]` tables.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Route database path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// Nominatim base URL for reverse geocoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocoder_url: Option<String>,

    /// Disable colored output
    #[serde(default)]
    pub no_color: bool,

    /// Engine settings
    #[serde(flatten)]
    pub engine: drivelog_core::Config,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        drivelog_core::default_config_path()
    }

    /// Load config from file, or return default if not found
    pub fn load() -> Self {
        let path = Self::path();
        if path.exists() {
            match Self::load_from(&path) {
                Ok(config) => return config,
                Err(e) => eprintln!("Warning: {:#}", e),
            }
        }
        Self::default()
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Save config to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

/// Resolve the database path from arg, config, or the platform default.
pub fn resolve_database(database: Option<PathBuf>, config: &Config) -> PathBuf {
    database
        .or_else(|| config.database.clone())
        .unwrap_or_else(drivelog_store::default_db_path)
}
