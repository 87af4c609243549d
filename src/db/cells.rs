//! Grid cell storage
//!
//! Append-only. Nothing here deduplicates: appending the same generation
//! run twice stores every cell twice. Callers that must not duplicate a
//! (region, resolution) check [`has_generation`] first.

use rusqlite::{params, params_from_iter, Connection, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rows_per_statement;
use crate::error::GridError;
use crate::models::{polygon_from_geojson, HexCell};
use crate::scale::{ScaleThresholds, ScaleTier};

/// Columns bound per cell in a multi-row insert
pub const INSERT_COLUMNS: usize = 7;

/// Identifies one generation run
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenerationKey {
    pub region_name: String,
    pub resolution: u8,
}

impl GenerationKey {
    pub fn new(region_name: impl Into<String>, resolution: u8) -> Self {
        Self {
            region_name: region_name.into(),
            resolution,
        }
    }
}

/// Raw cell row as stored
struct CellRow {
    hex_index: String,
    resolution: i64,
    scale: String,
    region_name: String,
    boundary: String,
    cost: f64,
    status: i64,
}

impl CellRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            hex_index: row.get("hex_index")?,
            resolution: row.get("resolution")?,
            scale: row.get("scale")?,
            region_name: row.get("region_name")?,
            boundary: row.get("boundary")?,
            cost: row.get("cost")?,
            status: row.get("status")?,
        })
    }

    fn into_cell(self) -> Result<HexCell, GridError> {
        let resolution = u8::try_from(self.resolution)
            .map_err(|_| GridError::InvalidCell(format!("stored resolution {}", self.resolution)))?;
        Ok(HexCell {
            boundary: polygon_from_geojson(&self.boundary)?,
            scale: self.scale.parse()?,
            hex_index: self.hex_index,
            resolution,
            region_name: self.region_name,
            cost: self.cost,
            status: self.status,
        })
    }
}

/// Append a batch of cells in one transaction.
///
/// Rows are written with multi-row `INSERT`s of at most `batch_size` cells.
/// Returns the number of rows written.
pub fn append_cells(
    conn: &mut Connection,
    cells: &[HexCell],
    batch_size: usize,
) -> Result<usize, GridError> {
    validate_all(cells)?;

    let tx = conn.transaction()?;
    let written = insert_batches(&tx, cells, batch_size)?;
    tx.commit()?;

    debug!(rows = written, "Appended grid cells");
    Ok(written)
}

/// Append cells for `key` unless the key already has rows.
///
/// The existence check and the insert share one immediate transaction, so
/// two writers for the same key cannot both append. Returns `None` when the
/// key was already generated.
pub fn append_if_absent(
    conn: &mut Connection,
    key: &GenerationKey,
    cells: &[HexCell],
    batch_size: usize,
) -> Result<Option<usize>, GridError> {
    validate_all(cells)?;
    if let Some(stray) = cells
        .iter()
        .find(|c| c.region_name != key.region_name || c.resolution != key.resolution)
    {
        return Err(GridError::InvalidCell(format!(
            "cell {} belongs to {} @ res {}, not {} @ res {}",
            stray.hex_index, stray.region_name, stray.resolution, key.region_name, key.resolution
        )));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if has_generation(&tx, key)? {
        debug!(region = %key.region_name, resolution = key.resolution, "Key already generated");
        return Ok(None);
    }
    let written = insert_batches(&tx, cells, batch_size)?;
    tx.commit()?;

    debug!(rows = written, region = %key.region_name, "Appended grid cells");
    Ok(Some(written))
}

fn validate_all(cells: &[HexCell]) -> Result<(), GridError> {
    cells.iter().try_for_each(HexCell::validate)
}

fn insert_batches(conn: &Connection, cells: &[HexCell], batch_size: usize) -> Result<usize, GridError> {
    let mut written = 0;

    for chunk in cells.chunks(rows_per_statement(batch_size, INSERT_COLUMNS)) {
        let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO h3_grid (hex_index, resolution, scale, region_name, boundary, cost, status) VALUES {}",
            placeholders
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(chunk.len() * INSERT_COLUMNS);
        for cell in chunk {
            values.push(cell.hex_index.clone().into());
            values.push(i64::from(cell.resolution).into());
            values.push(cell.scale.as_str().to_string().into());
            values.push(cell.region_name.clone().into());
            values.push(cell.boundary_geojson().into());
            values.push(cell.cost.into());
            values.push(cell.status.into());
        }

        written += conn.execute(&sql, params_from_iter(values))?;
    }
    Ok(written)
}

/// All cells of a region, optionally restricted to one resolution
pub fn cells_for_region(
    conn: &Connection,
    region_name: &str,
    resolution: Option<u8>,
) -> Result<Vec<HexCell>, GridError> {
    let mut stmt = conn.prepare(
        "SELECT hex_index, resolution, scale, region_name, boundary, cost, status
         FROM h3_grid
         WHERE region_name = ?1 AND (?2 IS NULL OR resolution = ?2)
         ORDER BY resolution, id",
    )?;

    let rows = stmt
        .query_map(params![region_name, resolution.map(i64::from)], CellRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(CellRow::into_cell).collect()
}

/// Cells of one generation key
pub fn cells_for_key(conn: &Connection, key: &GenerationKey) -> Result<Vec<HexCell>, GridError> {
    cells_for_region(conn, &key.region_name, Some(key.resolution))
}

/// Distinct (region, resolution) pairs present in the store
pub fn generated_pairs(conn: &Connection) -> Result<Vec<GenerationKey>, GridError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT region_name, resolution FROM h3_grid ORDER BY region_name, resolution",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(region_name, resolution)| {
            let resolution = u8::try_from(resolution)
                .map_err(|_| GridError::InvalidCell(format!("stored resolution {}", resolution)))?;
            Ok(GenerationKey { region_name, resolution })
        })
        .collect()
}

/// Whether any cells exist for a key
pub fn has_generation(conn: &Connection, key: &GenerationKey) -> Result<bool, GridError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM h3_grid WHERE region_name = ? AND resolution = ?)",
        params![key.region_name, i64::from(key.resolution)],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Number of stored rows for a key, duplicates included
pub fn count_cells(conn: &Connection, key: &GenerationKey) -> Result<u64, GridError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM h3_grid WHERE region_name = ? AND resolution = ?",
        params![key.region_name, i64::from(key.resolution)],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Rows whose stored tier differs from what `thresholds` assigns today
pub fn scale_mismatches(conn: &Connection, thresholds: &ScaleThresholds) -> Result<u64, GridError> {
    let mut stmt = conn.prepare(
        "SELECT resolution, scale, COUNT(*) FROM h3_grid GROUP BY resolution, scale",
    )?;

    let groups = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut mismatched = 0u64;
    for (resolution, scale, count) in groups {
        let resolution = u8::try_from(resolution)
            .map_err(|_| GridError::InvalidCell(format!("stored resolution {}", resolution)))?;
        let stored: ScaleTier = scale.parse()?;
        if stored != thresholds.classify(resolution) {
            mismatched += count as u64;
        }
    }
    Ok(mismatched)
}
