//! Record types for regions, grid cells, planning units and view metadata
//!
//! Each persisted relation has one fixed-field record type. Geometries are
//! `geo` types in memory and GeoJSON text in the store.

use geo::{Geometry, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::GridError;
use crate::scale::{ScaleTier, MAX_RESOLUTION};

/// Default cost of a freshly generated cell
pub const DEFAULT_COST: f64 = 1.0;

/// Default status of a freshly generated cell (unassigned)
pub const DEFAULT_STATUS: i64 = 0;

/// A named source region (ecoregion, administrative boundary)
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    /// Geographic coordinates, x = longitude, y = latitude
    pub geometry: Geometry<f64>,
}

impl Region {
    pub fn new(name: impl Into<String>, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            name: name.into(),
            geometry: geometry.into(),
        }
    }
}

/// One H3 cell generated for a region at a resolution
#[derive(Debug, Clone, PartialEq)]
pub struct HexCell {
    pub hex_index: String,
    pub resolution: u8,
    pub scale: ScaleTier,
    pub region_name: String,
    /// Closed polygon in (lon, lat) order
    pub boundary: Polygon<f64>,
    pub cost: f64,
    pub status: i64,
}

impl HexCell {
    /// Check field domains before the record is persisted
    pub fn validate(&self) -> Result<(), GridError> {
        if self.hex_index.is_empty() {
            return Err(GridError::InvalidCell("empty hex index".to_string()));
        }
        if self.resolution > MAX_RESOLUTION {
            return Err(GridError::InvalidResolution(self.resolution));
        }
        if !self.cost.is_finite() {
            return Err(GridError::InvalidCell(format!(
                "cell {} has non-finite cost",
                self.hex_index
            )));
        }
        let ring = self.boundary.exterior();
        // Closed ring: first == last, so 3 distinct vertices need 4 coords
        if !ring.is_closed() || ring.0.len() < 4 {
            return Err(GridError::InvalidCell(format!(
                "cell {} boundary is not a closed ring of at least 3 vertices",
                self.hex_index
            )));
        }
        Ok(())
    }

    /// Serialize the boundary for storage
    pub fn boundary_geojson(&self) -> String {
        polygon_to_geojson(&self.boundary)
    }
}

/// A cell assigned to a planning project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPlanningUnit {
    pub project_id: String,
    pub hex_index: String,
    pub cost: f64,
    pub status: i64,
}

impl ProjectPlanningUnit {
    /// Carry cost and status over from the originating cell
    pub fn from_cell(project_id: &str, cell: &HexCell) -> Self {
        Self {
            project_id: project_id.to_string(),
            hex_index: cell.hex_index.clone(),
            cost: cell.cost,
            status: cell.status,
        }
    }
}

/// Axis-aligned geographic envelope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Envelope {
    pub fn to_polygon(&self) -> Polygon<f64> {
        geo::Rect::new(
            geo::coord! { x: self.min_lon, y: self.min_lat },
            geo::coord! { x: self.max_lon, y: self.max_lat },
        )
        .to_polygon()
    }
}

/// Summary record describing one materialized (region, resolution) view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionViewMetadata {
    pub view_key: String,
    pub region_name: String,
    pub resolution: u8,
    pub scale: ScaleTier,
    pub alias: String,
    pub description: String,
    pub envelope: Option<Envelope>,
    pub cell_count: u64,
    pub created_at: String,
    pub source: String,
}

/// Encode a polygon as a GeoJSON geometry string
pub fn polygon_to_geojson(polygon: &Polygon<f64>) -> String {
    geojson::Geometry::new(geojson::Value::from(polygon)).to_string()
}

/// Decode a GeoJSON geometry string into a polygon
pub fn polygon_from_geojson(text: &str) -> Result<Polygon<f64>, GridError> {
    let geometry: geojson::Geometry = text.parse()?;
    Polygon::<f64>::try_from(geometry.value)
        .map_err(|e| GridError::InvalidCell(format!("boundary is not a polygon: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn sample_cell() -> HexCell {
        HexCell {
            hex_index: "831f8dfffffffff".to_string(),
            resolution: 3,
            scale: ScaleTier::Basin,
            region_name: "Baltic".to_string(),
            boundary: polygon![
                (x: 18.0, y: 56.0),
                (x: 19.0, y: 56.0),
                (x: 19.0, y: 57.0),
            ],
            cost: DEFAULT_COST,
            status: DEFAULT_STATUS,
        }
    }

    #[test]
    fn test_valid_cell() {
        sample_cell().validate().unwrap();
    }

    #[test]
    fn test_rejects_degenerate_boundary() {
        let mut cell = sample_cell();
        cell.boundary = polygon![(x: 18.0, y: 56.0), (x: 19.0, y: 56.0)];
        assert!(matches!(cell.validate(), Err(GridError::InvalidCell(_))));
    }

    #[test]
    fn test_rejects_bad_resolution_and_cost() {
        let mut cell = sample_cell();
        cell.resolution = 16;
        assert!(matches!(cell.validate(), Err(GridError::InvalidResolution(16))));

        let mut cell = sample_cell();
        cell.cost = f64::NAN;
        assert!(cell.validate().is_err());
    }

    #[test]
    fn test_boundary_geojson_keeps_lon_lat_order() {
        let cell = sample_cell();
        let text = cell.boundary_geojson();
        assert!(text.contains("[18.0,56.0]"), "unexpected encoding: {}", text);
        let decoded = polygon_from_geojson(&text).unwrap();
        assert_eq!(decoded, cell.boundary);
    }

    #[test]
    fn test_planning_unit_copies_cost_and_status() {
        let mut cell = sample_cell();
        cell.cost = 2.5;
        cell.status = 3;
        let unit = ProjectPlanningUnit::from_cell("p1", &cell);
        assert_eq!(unit.hex_index, cell.hex_index);
        assert_eq!(unit.cost, 2.5);
        assert_eq!(unit.status, 3);
    }
}
