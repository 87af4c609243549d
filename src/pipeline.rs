//! Batch pipeline stages
//!
//! Each stage walks a list of independent units (regions, (region,
//! resolution) pairs, projects) and reports one outcome per unit. A unit's
//! failure is recorded and the stage moves on; only configuration errors
//! detected before the first unit abort a stage.
//!
//! ```text
//! regions ──generate──▶ h3_grid ──materialize──▶ v_h3_* + region_views
//!                          │
//!                          └──populate (per project)──▶ project_planning_units
//! ```
//!
//! Cancellation is checked before each unit starts. Units already running
//! finish and commit; nothing is left half-written.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::db::{cells, GenerationKey, GridDb, ProjectRegions, ProjectTarget};
use crate::decompose::decompose;
use crate::error::GridError;
use crate::grid::{validate_resolution, GridGenerator};
use crate::materialize::{ViewMaterializer, ViewOutcome};
use crate::models::Region;
use crate::populate::{PlanningUnitPopulator, PopulateOutcome};
use crate::scale::ScaleThresholds;

/// Shared stop flag, set from a signal handler
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one unit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Generated { cells: usize, skipped_parts: usize },
    AlreadyGenerated,
    NoPolygons { skipped_parts: usize },
    ViewCreated { view_key: String, cell_count: u64 },
    AlreadyMaterialized { view_key: String },
    Inserted { rows: u64 },
    AlreadyPopulated,
    NoGrid { region_name: String },
    UnknownProject,
    Failed { error: String },
    Cancelled,
}

impl UnitOutcome {
    /// Whether the unit wrote anything
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Generated { .. } | Self::ViewCreated { .. } | Self::Inserted { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generated { cells, skipped_parts: 0 } => write!(f, "generated {} cells", cells),
            Self::Generated { cells, skipped_parts } => {
                write!(f, "generated {} cells ({} parts skipped)", cells, skipped_parts)
            }
            Self::AlreadyGenerated => write!(f, "skipped: already generated"),
            Self::NoPolygons { skipped_parts } => {
                write!(f, "skipped: no polygon parts ({} unsupported)", skipped_parts)
            }
            Self::ViewCreated { view_key, cell_count } => {
                write!(f, "created {} ({} cells)", view_key, cell_count)
            }
            Self::AlreadyMaterialized { view_key } => write!(f, "skipped: {} exists", view_key),
            Self::Inserted { rows } => write!(f, "inserted {}", rows),
            Self::AlreadyPopulated => write!(f, "skipped: already populated"),
            Self::NoGrid { region_name } => write!(f, "skipped: no grid for region {}", region_name),
            Self::UnknownProject => write!(f, "skipped: unknown project"),
            Self::Failed { error } => write!(f, "failed: {}", error),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<ViewOutcome> for UnitOutcome {
    fn from(outcome: ViewOutcome) -> Self {
        match outcome {
            ViewOutcome::Created { view_key, cell_count } => Self::ViewCreated { view_key, cell_count },
            ViewOutcome::AlreadyMaterialized { view_key } => Self::AlreadyMaterialized { view_key },
        }
    }
}

impl From<PopulateOutcome> for UnitOutcome {
    fn from(outcome: PopulateOutcome) -> Self {
        match outcome {
            PopulateOutcome::Inserted { rows } => Self::Inserted { rows },
            PopulateOutcome::AlreadyPopulated => Self::AlreadyPopulated,
            PopulateOutcome::NoGrid { region_name } => Self::NoGrid { region_name },
        }
    }
}

impl<T: Into<UnitOutcome>> From<Result<T, GridError>> for UnitOutcome {
    fn from(result: Result<T, GridError>) -> Self {
        match result {
            Ok(outcome) => outcome.into(),
            Err(e) => Self::Failed { error: e.to_string() },
        }
    }
}

/// Outcome of one unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReport {
    pub unit: String,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
}

/// Outcomes of one stage, in unit order
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub units: Vec<UnitReport>,
}

impl StageReport {
    fn new(stage: &'static str) -> Self {
        Self { stage, units: Vec::new() }
    }

    fn record(&mut self, unit: impl Into<String>, outcome: UnitOutcome) {
        let unit = unit.into();
        match &outcome {
            UnitOutcome::Failed { error } => error!(stage = self.stage, unit = %unit, %error, "Unit failed"),
            UnitOutcome::Cancelled => warn!(stage = self.stage, unit = %unit, "Unit cancelled"),
            other => info!(stage = self.stage, unit = %unit, "{}", other),
        }
        self.units.push(UnitReport { unit, outcome });
    }

    pub fn changed(&self) -> usize {
        self.units.iter().filter(|u| u.outcome.is_change()).count()
    }

    pub fn failed(&self) -> usize {
        self.units.iter().filter(|u| u.outcome.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.units.len() - self.changed() - self.failed()
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for unit in &self.units {
            writeln!(f, "{:<40} {}", unit.unit, unit.outcome)?;
        }
        write!(
            f,
            "{}: {} units, {} changed, {} skipped, {} failed",
            self.stage,
            self.units.len(),
            self.changed(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Settings for the generate stage
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub resolution: u8,
    pub thresholds: ScaleThresholds,
    pub batch_size: usize,
    pub workers: usize,
    /// Append even when the (region, resolution) already has cells
    pub force: bool,
}

/// Generate and store cells for every region at one resolution.
///
/// Regions are polyfilled concurrently on blocking workers. Unless `force`
/// is set, a region whose (region, resolution) already has cells is skipped:
/// the store itself would happily append a duplicate set. Region names must
/// be unique within one call.
pub async fn generate(
    db: Arc<GridDb>,
    regions: Vec<Region>,
    options: GenerateOptions,
    cancel: CancelFlag,
) -> Result<StageReport, GridError> {
    validate_resolution(options.resolution)?;
    options.thresholds.validate()?;

    {
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = regions.iter().find(|r| !seen.insert(r.name.as_str())) {
            return Err(GridError::Source(format!("duplicate region name '{}'", duplicate.name)));
        }
    }

    let generator = GridGenerator::new(options.thresholds);
    let permits = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut outcomes: Vec<Option<UnitOutcome>> = vec![None; regions.len()];
    let names: Vec<String> = regions.iter().map(|r| r.name.clone()).collect();

    info!(regions = regions.len(), resolution = options.resolution, "Generating grids");

    let mut spawned = 0;
    for (position, region) in regions.into_iter().enumerate() {
        let permit = Arc::clone(&permits)
            .acquire_owned()
            .await
            .map_err(|e| GridError::Internal(format!("Worker pool closed: {}", e)))?;

        if cancel.is_cancelled() {
            break;
        }

        let db = Arc::clone(&db);
        let options = options.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let outcome: UnitOutcome = generate_region(&db, &generator, &region, &options).into();
            (position, outcome)
        });
        spawned += 1;
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((position, outcome)) => outcomes[position] = Some(outcome),
            Err(e) => error!(error = %e, "Generation worker did not complete"),
        }
    }

    let mut report = StageReport::new("generate");
    for (position, (name, outcome)) in names.into_iter().zip(outcomes).enumerate() {
        let outcome = settle(outcome, position < spawned);
        report.record(format!("{} @ res {}", name, options.resolution), outcome);
    }
    Ok(report)
}

/// Final outcome of a generation slot. Units that never started were
/// cancelled; units that started but returned nothing died in their worker.
fn settle(outcome: Option<UnitOutcome>, started: bool) -> UnitOutcome {
    match outcome {
        Some(outcome) => outcome,
        None if started => UnitOutcome::Failed {
            error: "generation worker panicked".to_string(),
        },
        None => UnitOutcome::Cancelled,
    }
}

/// One generation unit: guard, decompose, polyfill, append
fn generate_region(
    db: &GridDb,
    generator: &GridGenerator,
    region: &Region,
    options: &GenerateOptions,
) -> Result<UnitOutcome, GridError> {
    let key = GenerationKey::new(region.name.clone(), options.resolution);
    if !options.force && db.with_conn(|conn| cells::has_generation(conn, &key))? {
        return Ok(UnitOutcome::AlreadyGenerated);
    }

    let decomposition = decompose(&region.name, &region.geometry);
    let skipped_parts = decomposition.skipped.len();
    if decomposition.polygons.is_empty() {
        return Ok(UnitOutcome::NoPolygons { skipped_parts });
    }

    let run = generator.generate_region(&decomposition, options.resolution)?;
    let written = if options.force {
        Some(db.with_conn_mut(|conn| cells::append_cells(conn, &run.cells, options.batch_size))?)
    } else {
        // Re-checked inside the write transaction; another writer may have
        // committed this key while the polyfill ran
        db.with_conn_mut(|conn| cells::append_if_absent(conn, &key, &run.cells, options.batch_size))?
    };

    Ok(match written {
        Some(cells) => UnitOutcome::Generated { cells, skipped_parts },
        None => UnitOutcome::AlreadyGenerated,
    })
}

/// Materialize a view for every (region, resolution) in the store
pub fn materialize(
    db: &GridDb,
    thresholds: ScaleThresholds,
    cancel: &CancelFlag,
) -> Result<StageReport, GridError> {
    thresholds.validate()?;
    let materializer = ViewMaterializer::new(thresholds);
    let pairs = db.with_conn(|conn| cells::generated_pairs(conn))?;

    let mut report = StageReport::new("materialize");
    for key in pairs {
        let unit = format!("{} @ res {}", key.region_name, key.resolution);
        if cancel.is_cancelled() {
            report.record(unit, UnitOutcome::Cancelled);
            continue;
        }
        report.record(unit, materializer.materialize_pair(db, &key).into());
    }
    Ok(report)
}

/// Populate planning units for the given projects, or every known project
/// when `project_ids` is empty
pub fn populate<R: ProjectRegions + ?Sized>(
    db: &GridDb,
    mapping: &R,
    project_ids: &[String],
    batch_size: usize,
    cancel: &CancelFlag,
) -> Result<StageReport, GridError> {
    let populator = PlanningUnitPopulator::new(batch_size);

    let targets: Vec<(String, Option<ProjectTarget>)> = if project_ids.is_empty() {
        mapping
            .all_projects()?
            .into_iter()
            .map(|t| (t.project_id.clone(), Some(t)))
            .collect()
    } else {
        project_ids
            .iter()
            .map(|id| Ok((id.clone(), mapping.target(id)?)))
            .collect::<Result<_, GridError>>()?
    };

    let mut report = StageReport::new("populate");
    for (project_id, target) in targets {
        if cancel.is_cancelled() {
            report.record(project_id, UnitOutcome::Cancelled);
            continue;
        }
        let outcome: UnitOutcome = match target {
            Some(target) => populator.populate(db, &target).into(),
            None => {
                warn!(project = %project_id, "No region mapped to project");
                UnitOutcome::UnknownProject
            }
        };
        report.record(project_id, outcome);
    }
    Ok(report)
}
