//! Region source loading
//!
//! Reads named regions from a GeoJSON `FeatureCollection`. Features without
//! a geometry or without a usable name are skipped and reported; they do not
//! stop the rest of the dataset from loading.

use std::collections::BTreeSet;
use std::path::Path;

use geojson::{FeatureCollection, GeoJson};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::GridError;
use crate::models::Region;

/// A feature that could not be turned into a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFeature {
    /// Position in the feature collection
    pub position: usize,
    pub reason: String,
}

/// Regions read from one dataset
#[derive(Debug, Clone, Default)]
pub struct SourceDataset {
    pub regions: Vec<Region>,
    pub skipped: Vec<SkippedFeature>,
}

/// Load regions from a GeoJSON file
pub fn load_regions(path: &Path, name_field: &str) -> Result<SourceDataset, GridError> {
    let text = std::fs::read_to_string(path)?;
    let dataset = parse_regions(&text, name_field)?;
    info!(
        path = %path.display(),
        regions = dataset.regions.len(),
        skipped = dataset.skipped.len(),
        "Loaded region source"
    );
    Ok(dataset)
}

/// Parse regions from GeoJSON text
pub fn parse_regions(text: &str, name_field: &str) -> Result<SourceDataset, GridError> {
    let collection = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection,
        GeoJson::Feature(feature) => FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        },
        GeoJson::Geometry(_) => {
            return Err(GridError::Source(
                "expected a FeatureCollection or Feature, found a bare geometry".to_string(),
            ))
        }
    };

    let mut dataset = SourceDataset::default();
    let mut seen = BTreeSet::new();

    for (position, feature) in collection.features.into_iter().enumerate() {
        let name = feature
            .property(name_field)
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let Some(name) = name else {
            warn!(position, field = %name_field, "Skipping feature without a region name");
            dataset.skipped.push(SkippedFeature {
                position,
                reason: format!("missing '{}' property", name_field),
            });
            continue;
        };

        let Some(geometry) = feature.geometry else {
            warn!(position, region = %name, "Skipping feature without geometry");
            dataset.skipped.push(SkippedFeature {
                position,
                reason: format!("region '{}' has no geometry", name),
            });
            continue;
        };

        let geometry = match geo::Geometry::<f64>::try_from(geometry) {
            Ok(geometry) => geometry,
            Err(e) => {
                warn!(position, region = %name, error = %e, "Skipping unreadable geometry");
                dataset.skipped.push(SkippedFeature {
                    position,
                    reason: format!("region '{}': {}", name, e),
                });
                continue;
            }
        };

        if !seen.insert(name.clone()) {
            return Err(GridError::Source(format!("duplicate region name '{}'", name)));
        }
        dataset.regions.push(Region { name, geometry });
    }

    Ok(dataset)
}
