//! Filtered grid views and their metadata rows

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::GridError;
use crate::models::{polygon_to_geojson, Envelope, RegionViewMetadata};

/// Quote a string as an SQL literal
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote an SQL identifier
fn sql_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Create the view scoped to one (region, resolution) if it does not exist.
///
/// Views cannot take bound parameters, so the filter values are inlined as
/// escaped literals.
pub fn create_view(
    conn: &Connection,
    view_key: &str,
    region_name: &str,
    resolution: u8,
) -> Result<(), GridError> {
    let sql = format!(
        "CREATE VIEW IF NOT EXISTS {} AS
         SELECT id, hex_index, resolution, scale, region_name, boundary, cost, status
         FROM h3_grid
         WHERE region_name = {} AND resolution = {}",
        sql_identifier(view_key),
        sql_literal(region_name),
        resolution
    );
    debug!(view = %view_key, "Creating view");
    conn.execute_batch(&sql)?;
    Ok(())
}

/// Whether a view of that name exists in the schema
pub fn view_exists(conn: &Connection, view_key: &str) -> Result<bool, GridError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'view' AND name = ?)",
        params![view_key],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Insert metadata unless the key is already present.
///
/// Returns true when a row was written.
pub fn insert_metadata_if_absent(
    conn: &Connection,
    metadata: &RegionViewMetadata,
) -> Result<bool, GridError> {
    let envelope = metadata.envelope;
    let changes = conn.execute(
        r#"
        INSERT OR IGNORE INTO region_views (
            view_key, region_name, resolution, scale, alias, description,
            min_lon, min_lat, max_lon, max_lat, envelope,
            cell_count, created_at, source
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            metadata.view_key,
            metadata.region_name,
            i64::from(metadata.resolution),
            metadata.scale.as_str(),
            metadata.alias,
            metadata.description,
            envelope.map(|e| e.min_lon),
            envelope.map(|e| e.min_lat),
            envelope.map(|e| e.max_lon),
            envelope.map(|e| e.max_lat),
            envelope.map(|e| polygon_to_geojson(&e.to_polygon())),
            metadata.cell_count as i64,
            metadata.created_at,
            metadata.source,
        ],
    )?;
    Ok(changes > 0)
}

/// Raw metadata row as stored
struct ViewRow {
    view_key: String,
    region_name: String,
    resolution: i64,
    scale: String,
    alias: String,
    description: String,
    min_lon: Option<f64>,
    min_lat: Option<f64>,
    max_lon: Option<f64>,
    max_lat: Option<f64>,
    cell_count: i64,
    created_at: String,
    source: String,
}

impl ViewRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            view_key: row.get("view_key")?,
            region_name: row.get("region_name")?,
            resolution: row.get("resolution")?,
            scale: row.get("scale")?,
            alias: row.get("alias")?,
            description: row.get("description")?,
            min_lon: row.get("min_lon")?,
            min_lat: row.get("min_lat")?,
            max_lon: row.get("max_lon")?,
            max_lat: row.get("max_lat")?,
            cell_count: row.get("cell_count")?,
            created_at: row.get("created_at")?,
            source: row.get("source")?,
        })
    }

    fn into_metadata(self) -> Result<RegionViewMetadata, GridError> {
        let envelope = match (self.min_lon, self.min_lat, self.max_lon, self.max_lat) {
            (Some(min_lon), Some(min_lat), Some(max_lon), Some(max_lat)) => Some(Envelope {
                min_lon,
                min_lat,
                max_lon,
                max_lat,
            }),
            _ => None,
        };
        let resolution = u8::try_from(self.resolution)
            .map_err(|_| GridError::InvalidCell(format!("stored resolution {}", self.resolution)))?;

        Ok(RegionViewMetadata {
            scale: self.scale.parse()?,
            view_key: self.view_key,
            region_name: self.region_name,
            resolution,
            alias: self.alias,
            description: self.description,
            envelope,
            cell_count: self.cell_count as u64,
            created_at: self.created_at,
            source: self.source,
        })
    }
}

/// Metadata for one view key
pub fn get_metadata(conn: &Connection, view_key: &str) -> Result<Option<RegionViewMetadata>, GridError> {
    conn.query_row(
        "SELECT * FROM region_views WHERE view_key = ?",
        params![view_key],
        ViewRow::from_row,
    )
    .optional()?
    .map(ViewRow::into_metadata)
    .transpose()
}

/// All metadata rows, ordered by key
pub fn list_metadata(conn: &Connection) -> Result<Vec<RegionViewMetadata>, GridError> {
    let mut stmt = conn.prepare("SELECT * FROM region_views ORDER BY view_key")?;
    let rows = stmt
        .query_map([], ViewRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(ViewRow::into_metadata).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;
    use crate::scale::ScaleTier;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn metadata(key: &str) -> RegionViewMetadata {
        RegionViewMetadata {
            view_key: key.to_string(),
            region_name: "Baltic".to_string(),
            resolution: 5,
            scale: ScaleTier::Regional,
            alias: "Baltic H3 res 5".to_string(),
            description: "test".to_string(),
            envelope: Some(Envelope {
                min_lon: 18.0,
                min_lat: 56.0,
                max_lon: 20.0,
                max_lat: 58.0,
            }),
            cell_count: 42,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            source: "h3".to_string(),
        }
    }

    #[test]
    fn test_insert_if_absent_is_noop_second_time() {
        let conn = conn();
        assert!(insert_metadata_if_absent(&conn, &metadata("v_h3_baltic_res_5")).unwrap());

        let mut changed = metadata("v_h3_baltic_res_5");
        changed.cell_count = 1;
        assert!(!insert_metadata_if_absent(&conn, &changed).unwrap());

        let stored = get_metadata(&conn, "v_h3_baltic_res_5").unwrap().unwrap();
        assert_eq!(stored, metadata("v_h3_baltic_res_5"));
        assert_eq!(list_metadata(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_view_filters_by_region_and_resolution() {
        let conn = conn();
        conn.execute_batch(
            "INSERT INTO h3_grid (hex_index, resolution, scale, region_name, boundary)
             VALUES ('a', 5, 'regional', 'Gulf of Bothnia''s Edge', '{}'),
                    ('b', 5, 'regional', 'Baltic', '{}'),
                    ('c', 6, 'regional', 'Gulf of Bothnia''s Edge', '{}');",
        )
        .unwrap();

        create_view(&conn, "v_h3_gulf_res_5", "Gulf of Bothnia's Edge", 5).unwrap();
        // Second creation is tolerated
        create_view(&conn, "v_h3_gulf_res_5", "Gulf of Bothnia's Edge", 5).unwrap();
        assert!(view_exists(&conn, "v_h3_gulf_res_5").unwrap());

        let hexes: Vec<String> = conn
            .prepare("SELECT hex_index FROM \"v_h3_gulf_res_5\"")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(hexes, vec!["a".to_string()]);
    }

    #[test]
    fn test_missing_metadata() {
        let conn = conn();
        assert!(get_metadata(&conn, "v_h3_nowhere_res_1").unwrap().is_none());
        assert!(!view_exists(&conn, "v_h3_nowhere_res_1").unwrap());
    }
}
