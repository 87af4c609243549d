//! Scale tiers derived from grid resolution
//!
//! A single step function shared by grid generation and everything that
//! later re-derives a tier from a stored resolution:
//!
//! | Resolution | Tier |
//! |------------|------|
//! | `< regional_from` | basin |
//! | `regional_from ..< local_from` | regional |
//! | `>= local_from` | local |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GridError;

/// Highest resolution of the H3 grid
pub const MAX_RESOLUTION: u8 = 15;

/// Coarse semantic label for a grid resolution.
///
/// Ordering follows specificity: `Basin < Regional < Local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleTier {
    Basin,
    Regional,
    Local,
}

impl ScaleTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basin => "basin",
            Self::Regional => "regional",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ScaleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScaleTier {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basin" => Ok(Self::Basin),
            "regional" => Ok(Self::Regional),
            "local" => Ok(Self::Local),
            other => Err(GridError::InvalidCell(format!("unknown scale tier '{}'", other))),
        }
    }
}

/// Cut points of the resolution → tier step function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleThresholds {
    /// First resolution classified as regional
    #[serde(default = "default_regional_from")]
    pub regional_from: u8,

    /// First resolution classified as local
    #[serde(default = "default_local_from")]
    pub local_from: u8,
}

fn default_regional_from() -> u8 { 5 }
fn default_local_from() -> u8 { 8 }

impl Default for ScaleThresholds {
    fn default() -> Self {
        Self {
            regional_from: default_regional_from(),
            local_from: default_local_from(),
        }
    }
}

impl ScaleThresholds {
    /// Build validated thresholds
    pub fn new(regional_from: u8, local_from: u8) -> Result<Self, GridError> {
        let thresholds = Self { regional_from, local_from };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Cut points must be strictly increasing and inside the grid's range
    pub fn validate(&self) -> Result<(), GridError> {
        if self.regional_from >= self.local_from {
            return Err(GridError::InvalidThresholds(format!(
                "regional_from ({}) must be lower than local_from ({})",
                self.regional_from, self.local_from
            )));
        }
        if self.local_from > MAX_RESOLUTION {
            return Err(GridError::InvalidThresholds(format!(
                "local_from ({}) exceeds the maximum resolution {}",
                self.local_from, MAX_RESOLUTION
            )));
        }
        Ok(())
    }

    /// Classify a resolution into its tier
    pub fn classify(&self, resolution: u8) -> ScaleTier {
        if resolution >= self.local_from {
            ScaleTier::Local
        } else if resolution >= self.regional_from {
            ScaleTier::Regional
        } else {
            ScaleTier::Basin
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cut_points() {
        let t = ScaleThresholds::default();
        assert_eq!(t.classify(0), ScaleTier::Basin);
        assert_eq!(t.classify(4), ScaleTier::Basin);
        assert_eq!(t.classify(5), ScaleTier::Regional);
        assert_eq!(t.classify(7), ScaleTier::Regional);
        assert_eq!(t.classify(8), ScaleTier::Local);
        assert_eq!(t.classify(15), ScaleTier::Local);
    }

    #[test]
    fn test_tiers_never_decrease_with_resolution() {
        for (regional_from, local_from) in [(1, 2), (3, 6), (5, 8), (14, 15)] {
            let t = ScaleThresholds::new(regional_from, local_from).unwrap();
            for r in 0..MAX_RESOLUTION {
                assert!(t.classify(r) <= t.classify(r + 1), "r={} thresholds={:?}", r, t);
            }
        }
    }

    #[test]
    fn test_rejects_non_increasing_thresholds() {
        assert!(matches!(
            ScaleThresholds::new(6, 6),
            Err(GridError::InvalidThresholds(_))
        ));
        assert!(ScaleThresholds::new(8, 5).is_err());
        assert!(ScaleThresholds::new(5, 16).is_err());
    }

    #[test]
    fn test_tier_string_roundtrip() {
        for tier in [ScaleTier::Basin, ScaleTier::Regional, ScaleTier::Local] {
            assert_eq!(tier.as_str().parse::<ScaleTier>().unwrap(), tier);
        }
        assert!("continental".parse::<ScaleTier>().is_err());
    }

    #[test]
    fn test_thresholds_from_partial_toml() {
        let t: ScaleThresholds = toml::from_str("local_from = 10").unwrap();
        assert_eq!(t.regional_from, 5);
        assert_eq!(t.local_from, 10);
    }
}
