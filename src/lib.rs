//! Planning Grid - H3 hexagonal planning grids for conservation regions
//!
//! Turns named region geometries into H3 cell grids, exposes each
//! (region, resolution) grid as a queryable view, and assigns grid cells to
//! conservation projects as planning units.
//!
//! ## Architecture
//!
//! | Stage | Module | Writes |
//! |-------|--------|--------|
//! | Load regions | `source` | - |
//! | Split into polygons | `decompose` | - |
//! | Polyfill + tier | `grid`, `scale` | `h3_grid` (append) |
//! | Materialize views | `materialize` | `v_h3_*`, `region_views` |
//! | Assign to projects | `populate` | `project_planning_units` |
//!
//! `pipeline` runs each stage over its units and reports one outcome per
//! unit; `db` owns the SQLite store all stages share.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/planning-grid/
//! ├── grid.db        # SQLite store (WAL)
//! └── config.toml    # Configuration
//! ```

pub mod config;
pub mod db;
pub mod decompose;
pub mod error;
pub mod grid;
pub mod materialize;
pub mod models;
pub mod pipeline;
pub mod populate;
pub mod scale;
pub mod source;

// Re-exports
pub use config::Config;
pub use db::{GenerationKey, GridDb, ProjectRegions, ProjectTarget};
pub use decompose::{decompose, Decomposition, SkippedPart};
pub use error::GridError;
pub use grid::{GridGenerator, GridRun};
pub use materialize::{view_key, ViewMaterializer, ViewOutcome};
pub use models::{Envelope, HexCell, ProjectPlanningUnit, Region, RegionViewMetadata};
pub use pipeline::{CancelFlag, GenerateOptions, StageReport, UnitOutcome, UnitReport};
pub use populate::{PlanningUnitPopulator, PopulateOutcome};
pub use scale::{ScaleThresholds, ScaleTier};
