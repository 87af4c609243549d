//! SQLite spatial store for grids, views and planning units
//!
//! ## Tables
//!
//! - `h3_grid` - Generated cells, append-only (region, resolution, boundary GeoJSON)
//! - `region_views` - One metadata row per materialized `v_h3_*` view
//! - `project_planning_units` - Cells assigned to projects, keyed (project_id, hex_index)
//! - `projects` - Project → region mapping supplied by project management
//!
//! Geometries are stored as GeoJSON text in (lon, lat) order.

pub mod schema;
pub mod cells;
pub mod views;
pub mod planning_units;
pub mod projects;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::GridError;

/// Bound-variable ceiling of the bundled SQLite build
pub const MAX_SQL_VARIABLES: usize = 32766;

/// Largest insert batch whose widest multi-row `INSERT` fits the variable ceiling
pub const MAX_INSERT_BATCH: usize = MAX_SQL_VARIABLES / cells::INSERT_COLUMNS;

/// Rows per multi-row `INSERT` for a table of `columns` bound columns
pub(crate) fn rows_per_statement(batch_size: usize, columns: usize) -> usize {
    batch_size.clamp(1, MAX_SQL_VARIABLES / columns)
}

/// Handle to the spatial store, passed explicitly to each pipeline stage
pub struct GridDb {
    conn: Mutex<Connection>,
}

impl GridDb {
    /// Open or create the grid database at a file path
    pub fn open(db_path: &Path) -> Result<Self, GridError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // WAL keeps readers unblocked while a unit commits
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, GridError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), GridError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read-only operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, GridError>
    where
        F: FnOnce(&Connection) -> Result<T, GridError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| GridError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, GridError>
    where
        F: FnOnce(&mut Connection) -> Result<T, GridError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| GridError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Row counts per relation
    pub fn stats(&self) -> Result<DbStats, GridError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, GridError> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                cell_count: count("SELECT COUNT(*) FROM h3_grid")?,
                generated_pairs: count(
                    "SELECT COUNT(*) FROM (SELECT DISTINCT region_name, resolution FROM h3_grid)",
                )?,
                view_count: count("SELECT COUNT(*) FROM region_views")?,
                project_count: count("SELECT COUNT(*) FROM projects")?,
                planning_unit_count: count("SELECT COUNT(*) FROM project_planning_units")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub cell_count: u64,
    pub generated_pairs: u64,
    pub view_count: u64,
    pub project_count: u64,
    pub planning_unit_count: u64,
}

/// Mapping lookups through the store's `projects` table
impl ProjectRegions for GridDb {
    fn target(&self, project_id: &str) -> Result<Option<ProjectTarget>, GridError> {
        self.with_conn(|conn| conn.target(project_id))
    }

    fn all_projects(&self) -> Result<Vec<ProjectTarget>, GridError> {
        self.with_conn(|conn| conn.all_projects())
    }
}

// Re-exports
pub use cells::GenerationKey;
pub use projects::{ProjectRegions, ProjectTarget};
