//! H3 grid generation
//!
//! Converts simple polygons into hexagonal cells at one resolution. Cells
//! are selected with [`ContainmentMode::IntersectsBoundary`], so cells that
//! only partially overlap the polygon are kept whole and the union of all
//! emitted cells covers the polygon.
//!
//! H3 reports boundary vertices as (lat, lng); emitted boundaries are
//! re-ordered to (lon, lat) to match `geo` and GeoJSON conventions.

use std::collections::BTreeSet;

use geo::{LineString, Polygon};
use h3o::geom::{ContainmentMode, PolyfillConfig, ToCells};
use h3o::{CellIndex, Resolution};
use tracing::debug;

use crate::decompose::Decomposition;
use crate::error::GridError;
use crate::models::{HexCell, DEFAULT_COST, DEFAULT_STATUS};
use crate::scale::ScaleThresholds;

/// Validate a numeric resolution against the grid's supported range
pub fn validate_resolution(resolution: u8) -> Result<Resolution, GridError> {
    Resolution::try_from(resolution).map_err(|_| GridError::InvalidResolution(resolution))
}

/// Boundary of a cell as a closed (lon, lat) polygon
pub fn cell_boundary(cell: CellIndex) -> Polygon<f64> {
    let ring: Vec<(f64, f64)> = cell
        .boundary()
        .iter()
        .map(|vertex| (vertex.lng(), vertex.lat()))
        .collect();
    // LineString -> Polygon closes the ring
    Polygon::new(LineString::from(ring), vec![])
}

/// Cells produced for one region at one resolution
#[derive(Debug, Clone)]
pub struct GridRun {
    pub region_name: String,
    pub resolution: u8,
    /// Sorted by hex index, no duplicates
    pub cells: Vec<HexCell>,
}

/// Turns polygons into [`HexCell`] records
#[derive(Debug, Clone, Copy, Default)]
pub struct GridGenerator {
    thresholds: ScaleThresholds,
}

impl GridGenerator {
    pub fn new(thresholds: ScaleThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ScaleThresholds {
        &self.thresholds
    }

    /// Cell indexes intersecting one polygon
    pub fn polyfill(
        &self,
        region_name: &str,
        polygon: &Polygon<f64>,
        resolution: u8,
    ) -> Result<BTreeSet<CellIndex>, GridError> {
        let res = validate_resolution(resolution)?;

        // Fewer than 4 coordinates cannot enclose any area
        if polygon.exterior().0.len() < 4 {
            debug!(region = %region_name, "Empty polygon, no cells");
            return Ok(BTreeSet::new());
        }

        let h3_polygon = h3o::geom::Polygon::from_degrees(polygon.clone()).map_err(|e| {
            GridError::InvalidGeometry {
                region: region_name.to_string(),
                reason: e.to_string(),
            }
        })?;

        let config = PolyfillConfig::new(res).containment_mode(ContainmentMode::IntersectsBoundary);
        Ok(h3_polygon.to_cells(config).collect())
    }

    /// Generate cells for a single simple polygon
    pub fn generate_polygon(
        &self,
        region_name: &str,
        polygon: &Polygon<f64>,
        resolution: u8,
    ) -> Result<Vec<HexCell>, GridError> {
        let cells = self.polyfill(region_name, polygon, resolution)?;
        Ok(self.to_records(region_name, resolution, cells))
    }

    /// Generate cells for every polygon of a decomposed region.
    ///
    /// Cells touched by more than one polygon are emitted once.
    pub fn generate_region(
        &self,
        decomposition: &Decomposition,
        resolution: u8,
    ) -> Result<GridRun, GridError> {
        validate_resolution(resolution)?;

        let mut cells = BTreeSet::new();
        for polygon in &decomposition.polygons {
            cells.extend(self.polyfill(&decomposition.region_name, polygon, resolution)?);
        }

        debug!(
            region = %decomposition.region_name,
            resolution,
            polygons = decomposition.polygons.len(),
            cells = cells.len(),
            "Polyfill complete"
        );

        Ok(GridRun {
            region_name: decomposition.region_name.clone(),
            resolution,
            cells: self.to_records(&decomposition.region_name, resolution, cells),
        })
    }

    fn to_records(
        &self,
        region_name: &str,
        resolution: u8,
        cells: BTreeSet<CellIndex>,
    ) -> Vec<HexCell> {
        let scale = self.thresholds.classify(resolution);
        cells
            .into_iter()
            .map(|cell| HexCell {
                hex_index: cell.to_string(),
                resolution,
                scale,
                region_name: region_name.to_string(),
                boundary: cell_boundary(cell),
                cost: DEFAULT_COST,
                status: DEFAULT_STATUS,
            })
            .collect()
    }
}
