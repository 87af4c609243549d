//! Configuration for planning-grid

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::db::MAX_INSERT_BATCH;
use crate::error::GridError;
use crate::grid::validate_resolution;
use crate::scale::ScaleThresholds;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("planning-grid")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Resolution used when `generate` is given none
    #[serde(default = "default_resolution")]
    pub default_resolution: u8,

    /// GeoJSON feature property holding the region name
    #[serde(default = "default_region_name_field")]
    pub region_name_field: String,

    /// Rows per multi-row INSERT
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,

    /// Regions polyfilled concurrently
    #[serde(default = "default_generation_workers")]
    pub generation_workers: usize,

    /// Resolution → scale tier cut points
    #[serde(default)]
    pub scale: ScaleThresholds,
}

fn default_database_file() -> String {
    "grid.db".to_string()
}

fn default_resolution() -> u8 {
    7
}

fn default_region_name_field() -> String {
    "name".to_string()
}

fn default_insert_batch_size() -> usize {
    500
}

fn default_generation_workers() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            default_resolution: default_resolution(),
            region_name_field: default_region_name_field(),
            insert_batch_size: default_insert_batch_size(),
            generation_workers: default_generation_workers(),
            scale: ScaleThresholds::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GridError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| GridError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), GridError> {
        let content = toml::to_string_pretty(self).map_err(|e| GridError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would fail later stages
    pub fn validate(&self) -> Result<(), GridError> {
        validate_resolution(self.default_resolution)?;
        self.scale.validate()?;
        if self.insert_batch_size == 0 || self.insert_batch_size > MAX_INSERT_BATCH {
            return Err(GridError::Config(format!(
                "insert_batch_size must be between 1 and {}",
                MAX_INSERT_BATCH
            )));
        }
        if self.generation_workers == 0 {
            return Err(GridError::Config("generation_workers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
