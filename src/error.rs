//! Error types for planning-grid

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Invalid resolution: {0} (supported range is 0-15)")]
    InvalidResolution(u8),

    #[error("Invalid scale thresholds: {0}")]
    InvalidThresholds(String),

    #[error("Invalid geometry for region {region}: {reason}")]
    InvalidGeometry { region: String, reason: String },

    #[error("Invalid cell record: {0}")]
    InvalidCell(String),

    #[error("View key {view_key} already describes region {existing}, cannot reuse it for {region}")]
    ViewKeyCollision {
        view_key: String,
        existing: String,
        region: String,
    },

    #[error("Source dataset error: {0}")]
    Source(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
