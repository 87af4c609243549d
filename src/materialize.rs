//! View materialization
//!
//! For every (region, resolution) present in the grid store, creates a
//! filtered view `v_h3_<region>_res_<r>` and a metadata row describing it.
//! Both are created at most once: the existence check and the writes for
//! one pair share an immediate transaction, and the metadata insert is
//! `INSERT OR IGNORE` keyed on the view key.

use chrono::Utc;
use geo::{BoundingRect, MultiPolygon};
use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{cells, views, GenerationKey, GridDb};
use crate::error::GridError;
use crate::models::{Envelope, HexCell, RegionViewMetadata};
use crate::scale::ScaleThresholds;

/// Source tag recorded on every metadata row
pub const VIEW_SOURCE: &str = "h3";

/// Normalize a region name for use inside a view key.
///
/// Lower-cases, collapses runs of whitespace, hyphens and any other
/// non-alphanumeric characters into one `_`, and trims separators at the ends.
pub fn normalize_region_name(region_name: &str) -> String {
    let mut out = String::with_capacity(region_name.len());
    let mut pending_separator = false;
    for ch in region_name.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch);
        } else {
            pending_separator = true;
        }
    }
    out
}

/// Deterministic view key for a (region, resolution) pair
pub fn view_key(region_name: &str, resolution: u8) -> String {
    format!("v_h3_{}_res_{}", normalize_region_name(region_name), resolution)
}

/// Envelope of the union of all cell boundaries
pub fn envelope_of(cells: &[HexCell]) -> Option<Envelope> {
    let union = MultiPolygon(cells.iter().map(|c| c.boundary.clone()).collect());
    union.bounding_rect().map(|rect| Envelope {
        min_lon: rect.min().x,
        min_lat: rect.min().y,
        max_lon: rect.max().x,
        max_lat: rect.max().y,
    })
}

/// Result of materializing one pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ViewOutcome {
    Created { view_key: String, cell_count: u64 },
    AlreadyMaterialized { view_key: String },
}

/// Materializes views using one shared tier table
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewMaterializer {
    thresholds: ScaleThresholds,
}

impl ViewMaterializer {
    pub fn new(thresholds: ScaleThresholds) -> Self {
        Self { thresholds }
    }

    /// Build the metadata record for a pair from its cells
    pub fn describe(&self, key: &GenerationKey, cells: &[HexCell]) -> RegionViewMetadata {
        let scale = self.thresholds.classify(key.resolution);
        RegionViewMetadata {
            view_key: view_key(&key.region_name, key.resolution),
            region_name: key.region_name.clone(),
            resolution: key.resolution,
            scale,
            alias: format!("{} H3 res {}", key.region_name, key.resolution),
            description: format!(
                "H3 hexagonal grid of {} at resolution {} ({} scale, {} cells)",
                key.region_name,
                key.resolution,
                scale,
                cells.len()
            ),
            envelope: envelope_of(cells),
            cell_count: cells.len() as u64,
            created_at: Utc::now().to_rfc3339(),
            source: VIEW_SOURCE.to_string(),
        }
    }

    /// Materialize one pair inside its own transaction
    pub fn materialize_pair(&self, db: &GridDb, key: &GenerationKey) -> Result<ViewOutcome, GridError> {
        let view_key = view_key(&key.region_name, key.resolution);

        db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(existing) = views::get_metadata(&tx, &view_key)? {
                if existing.region_name != key.region_name || existing.resolution != key.resolution {
                    return Err(GridError::ViewKeyCollision {
                        view_key,
                        existing: existing.region_name,
                        region: key.region_name.clone(),
                    });
                }
                debug!(view = %view_key, "Metadata already present");
                // Recreate a view dropped out-of-band; no-op otherwise
                views::create_view(&tx, &view_key, &key.region_name, key.resolution)?;
                tx.commit()?;
                return Ok(ViewOutcome::AlreadyMaterialized { view_key });
            }

            let cells = cells::cells_for_key(&tx, key)?;
            let metadata = self.describe(key, &cells);

            views::create_view(&tx, &view_key, &key.region_name, key.resolution)?;
            let inserted = views::insert_metadata_if_absent(&tx, &metadata)?;
            tx.commit()?;

            if inserted {
                Ok(ViewOutcome::Created {
                    view_key,
                    cell_count: metadata.cell_count,
                })
            } else {
                Ok(ViewOutcome::AlreadyMaterialized { view_key })
            }
        })
    }

    /// Materialize every pair present in the store.
    ///
    /// A failing pair is reported in its slot and does not stop the others.
    pub fn materialize_all(&self, db: &GridDb) -> Result<Vec<(GenerationKey, Result<ViewOutcome, GridError>)>, GridError> {
        let pairs = db.with_conn(|conn| cells::generated_pairs(conn))?;
        info!(pairs = pairs.len(), "Materializing region views");

        Ok(pairs
            .into_iter()
            .map(|key| {
                let outcome = self.materialize_pair(db, &key);
                (key, outcome)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DEFAULT_COST, DEFAULT_STATUS};
    use crate::scale::ScaleTier;
    use geo::polygon;

    fn cell(hex: &str, region: &str, resolution: u8, x: f64, y: f64) -> HexCell {
        HexCell {
            hex_index: hex.to_string(),
            resolution,
            scale: ScaleThresholds::default().classify(resolution),
            region_name: region.to_string(),
            boundary: polygon![(x: x, y: y), (x: x + 1.0, y: y), (x: x + 1.0, y: y + 1.0)],
            cost: DEFAULT_COST,
            status: DEFAULT_STATUS,
        }
    }

    #[test]
    fn test_view_key_normalization() {
        assert_eq!(view_key("Baltic", 3), "v_h3_baltic_res_3");
        assert_eq!(view_key("North  Sea", 7), "v_h3_north_sea_res_7");
        assert_eq!(view_key("Bay of Biscay - Iberian Coast", 6), "v_h3_bay_of_biscay_iberian_coast_res_6");
        assert_eq!(view_key(" Celtic-Seas ", 5), "v_h3_celtic_seas_res_5");
        assert_eq!(view_key("Gulf of St. Lawrence", 5), "v_h3_gulf_of_st_lawrence_res_5");
    }

    #[test]
    fn test_envelope_spans_all_cells() {
        let cells = vec![cell("a", "r", 3, 18.0, 56.0), cell("b", "r", 3, 19.5, 57.0)];
        let env = envelope_of(&cells).unwrap();
        assert_eq!(env, Envelope { min_lon: 18.0, min_lat: 56.0, max_lon: 20.5, max_lat: 58.0 });
        assert!(envelope_of(&[]).is_none());
    }

    #[test]
    fn test_materialize_twice_yields_one_record_per_pair() {
        let db = GridDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            cells::append_cells(
                conn,
                &[
                    cell("a", "Baltic", 3, 18.0, 56.0),
                    cell("b", "Baltic", 3, 19.0, 56.0),
                    cell("c", "Baltic", 5, 18.0, 56.0),
                    cell("d", "North Sea", 3, 2.0, 55.0),
                ],
                500,
            )
        })
        .unwrap();

        let materializer = ViewMaterializer::default();
        let first = materializer.materialize_all(&db).unwrap();
        assert_eq!(first.len(), 3);
        assert!(first
            .iter()
            .all(|(_, outcome)| matches!(outcome, Ok(ViewOutcome::Created { .. }))));

        let second = materializer.materialize_all(&db).unwrap();
        assert!(second
            .iter()
            .all(|(_, outcome)| matches!(outcome, Ok(ViewOutcome::AlreadyMaterialized { .. }))));

        let metadata = db.with_conn(|conn| views::list_metadata(conn)).unwrap();
        assert_eq!(metadata.len(), 3);

        let baltic = db
            .with_conn(|conn| views::get_metadata(conn, "v_h3_baltic_res_3"))
            .unwrap()
            .unwrap();
        assert_eq!(baltic.cell_count, 2);
        assert_eq!(baltic.scale, ScaleTier::Basin);
        assert_eq!(baltic.source, "h3");
        assert_eq!(baltic.alias, "Baltic H3 res 3");
        assert!(db.with_conn(|conn| views::view_exists(conn, "v_h3_north_sea_res_3")).unwrap());
    }

    #[test]
    fn test_colliding_names_are_not_reported_as_materialized() {
        let db = GridDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            cells::append_cells(
                conn,
                &[
                    cell("a", "North Sea", 5, 2.0, 55.0),
                    cell("b", "North-Sea", 5, 3.0, 55.0),
                    cell("c", "North-Sea", 5, 4.0, 55.0),
                ],
                500,
            )
        })
        .unwrap();

        let materializer = ViewMaterializer::default();
        let first = materializer
            .materialize_pair(&db, &GenerationKey::new("North Sea", 5))
            .unwrap();
        assert!(matches!(first, ViewOutcome::Created { cell_count: 1, .. }));

        let second = materializer.materialize_pair(&db, &GenerationKey::new("North-Sea", 5));
        match second {
            Err(GridError::ViewKeyCollision { view_key, existing, region }) => {
                assert_eq!(view_key, "v_h3_north_sea_res_5");
                assert_eq!(existing, "North Sea");
                assert_eq!(region, "North-Sea");
            }
            other => panic!("expected a key collision, got {:?}", other),
        }

        // The first pair's view still filters on its own region only
        let rows: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM v_h3_north_sea_res_5", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_metadata_tier_matches_cell_tier() {
        let thresholds = ScaleThresholds::new(2, 4).unwrap();
        let materializer = ViewMaterializer::new(thresholds);
        let mut c = cell("a", "Baltic", 3, 18.0, 56.0);
        c.scale = thresholds.classify(3);
        let meta = materializer.describe(&GenerationKey::new("Baltic", 3), &[c.clone()]);
        assert_eq!(meta.scale, c.scale);
        assert_eq!(meta.scale, ScaleTier::Regional);
    }
}
