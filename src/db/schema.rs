//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::GridError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), GridError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, GridError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), GridError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), GridError> {
    conn.execute_batch(GRID_SCHEMA)?;
    conn.execute_batch(VIEWS_SCHEMA)?;
    conn.execute_batch(PROJECTS_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

/// Generated cells
const GRID_SCHEMA: &str = r#"
-- Append-only: no uniqueness on (hex_index, resolution).
-- Re-running a generation for the same region/resolution stores the cells again.
CREATE TABLE IF NOT EXISTS h3_grid (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hex_index TEXT NOT NULL,
    resolution INTEGER NOT NULL CHECK (resolution BETWEEN 0 AND 15),
    scale TEXT NOT NULL CHECK (scale IN ('basin', 'regional', 'local')),
    region_name TEXT NOT NULL,

    -- GeoJSON Polygon, (lon, lat) order
    boundary TEXT NOT NULL,

    cost REAL NOT NULL DEFAULT 1.0,
    status INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Materialized view metadata
const VIEWS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS region_views (
    view_key TEXT PRIMARY KEY NOT NULL,
    region_name TEXT NOT NULL,
    resolution INTEGER NOT NULL,
    scale TEXT NOT NULL,
    alias TEXT NOT NULL,
    description TEXT NOT NULL,

    -- Envelope of the union of all cell boundaries
    min_lon REAL,
    min_lat REAL,
    max_lon REAL,
    max_lat REAL,
    envelope TEXT,

    cell_count INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'h3'
);
"#;

/// Projects and their planning units
const PROJECTS_SCHEMA: &str = r#"
-- Maintained by project management; read-only for the populator
CREATE TABLE IF NOT EXISTS projects (
    project_id TEXT PRIMARY KEY NOT NULL,
    region_name TEXT NOT NULL,
    -- NULL: every generated resolution of the region
    resolution INTEGER CHECK (resolution IS NULL OR resolution BETWEEN 0 AND 15)
);

CREATE TABLE IF NOT EXISTS project_planning_units (
    project_id TEXT NOT NULL,
    hex_index TEXT NOT NULL,
    cost REAL NOT NULL DEFAULT 1.0,
    status INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (project_id, hex_index)
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_h3_grid_region_res ON h3_grid(region_name, resolution);
CREATE INDEX IF NOT EXISTS idx_h3_grid_hex ON h3_grid(hex_index);
CREATE INDEX IF NOT EXISTS idx_planning_units_project ON project_planning_units(project_id);
"#;
