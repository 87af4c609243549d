//! Region geometry decomposition
//!
//! Flattens a region's geometry into simple polygons. Multi-part geometries
//! are split, geometry collections are walked recursively, and anything that
//! is not areal is skipped with a diagnostic rather than failing the region.

use geo::{Geometry, Polygon};
use serde::Serialize;
use tracing::warn;

/// A geometry part that could not be gridded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPart {
    pub region_name: String,
    pub geometry_type: &'static str,
}

/// Output of decomposing one region geometry
#[derive(Debug, Clone, Default)]
pub struct Decomposition {
    pub region_name: String,
    /// Simple polygons, in source order
    pub polygons: Vec<Polygon<f64>>,
    pub skipped: Vec<SkippedPart>,
}

/// Split a region geometry into simple polygons
pub fn decompose(region_name: &str, geometry: &Geometry<f64>) -> Decomposition {
    let mut out = Decomposition {
        region_name: region_name.to_string(),
        ..Default::default()
    };
    collect(region_name, geometry, &mut out);
    out
}

fn collect(region_name: &str, geometry: &Geometry<f64>, out: &mut Decomposition) {
    match geometry {
        Geometry::Polygon(polygon) => out.polygons.push(polygon.clone()),
        Geometry::MultiPolygon(multi) => out.polygons.extend(multi.0.iter().cloned()),
        Geometry::GeometryCollection(collection) => {
            for part in collection.iter() {
                collect(region_name, part, out);
            }
        }
        other => {
            let geometry_type = geometry_type_name(other);
            warn!(
                region = %region_name,
                geometry_type,
                "Skipping unsupported geometry part"
            );
            out.skipped.push(SkippedPart {
                region_name: region_name.to_string(),
                geometry_type,
            });
        }
    }
}

fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon, GeometryCollection, MultiPolygon};

    fn square(x: f64, y: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
        ]
    }

    #[test]
    fn test_single_polygon() {
        let d = decompose("Baltic", &Geometry::Polygon(square(18.0, 56.0)));
        assert_eq!(d.polygons.len(), 1);
        assert!(d.skipped.is_empty());
        assert_eq!(d.region_name, "Baltic");
    }

    #[test]
    fn test_multipolygon_keeps_part_order() {
        let multi = MultiPolygon(vec![square(0.0, 0.0), square(5.0, 5.0), square(10.0, 0.0)]);
        let d = decompose("Islands", &Geometry::MultiPolygon(multi));
        assert_eq!(d.polygons.len(), 3);
        assert_eq!(d.polygons[1], square(5.0, 5.0));
    }

    #[test]
    fn test_unsupported_part_is_skipped_not_fatal() {
        let collection = GeometryCollection(vec![
            Geometry::Polygon(square(18.0, 56.0)),
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]),
        ]);
        let d = decompose("Mixed", &Geometry::GeometryCollection(collection));
        assert_eq!(d.polygons.len(), 1);
        assert_eq!(
            d.skipped,
            vec![SkippedPart {
                region_name: "Mixed".to_string(),
                geometry_type: "LineString",
            }]
        );
    }

    #[test]
    fn test_point_region_yields_nothing() {
        let d = decompose("Dot", &Geometry::Point(point!(x: 1.0, y: 2.0)));
        assert!(d.polygons.is_empty());
        assert_eq!(d.skipped.len(), 1);
        assert_eq!(d.skipped[0].geometry_type, "Point");
    }
}
