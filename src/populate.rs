//! Planning unit population
//!
//! Assigns a project every cell of its region that it does not already
//! have. The read of region cells, the read of assigned indexes and the
//! insert of the difference run in one immediate transaction, so re-running
//! after a partial or complete run only inserts what is missing.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{cells, planning_units, GridDb, ProjectTarget};
use crate::error::GridError;
use crate::models::{HexCell, ProjectPlanningUnit};

/// Result of populating one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PopulateOutcome {
    Inserted { rows: u64 },
    /// Every region cell is already assigned
    AlreadyPopulated,
    /// The region has no generated grid yet
    NoGrid { region_name: String },
}

/// Region cells missing from `assigned`, one per hex index, ordered by index.
///
/// The first stored row of a hex index supplies cost and status.
pub fn missing_units<'a>(
    project_id: &str,
    region_cells: &'a [HexCell],
    assigned: &BTreeSet<String>,
) -> Vec<ProjectPlanningUnit> {
    let mut by_index: BTreeMap<&'a str, &'a HexCell> = BTreeMap::new();
    for cell in region_cells {
        by_index.entry(cell.hex_index.as_str()).or_insert(cell);
    }

    by_index
        .into_values()
        .filter(|cell| !assigned.contains(&cell.hex_index))
        .map(|cell| ProjectPlanningUnit::from_cell(project_id, cell))
        .collect()
}

/// Populates planning units for projects
#[derive(Debug, Clone, Copy)]
pub struct PlanningUnitPopulator {
    batch_size: usize,
}

impl Default for PlanningUnitPopulator {
    fn default() -> Self {
        Self { batch_size: 500 }
    }
}

impl PlanningUnitPopulator {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Populate one project inside its own transaction
    pub fn populate(&self, db: &GridDb, target: &ProjectTarget) -> Result<PopulateOutcome, GridError> {
        db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let region_cells = cells::cells_for_region(&tx, &target.region_name, target.resolution)?;
            if region_cells.is_empty() {
                warn!(
                    project = %target.project_id,
                    region = %target.region_name,
                    "Region has no generated grid, skipping project"
                );
                return Ok(PopulateOutcome::NoGrid {
                    region_name: target.region_name.clone(),
                });
            }

            let assigned = planning_units::assigned_indexes(&tx, &target.project_id)?;
            let missing = missing_units(&target.project_id, &region_cells, &assigned);
            debug!(
                project = %target.project_id,
                region_cells = region_cells.len(),
                assigned = assigned.len(),
                missing = missing.len(),
                "Computed planning unit difference"
            );

            if missing.is_empty() {
                info!(project = %target.project_id, "Planning units already populated");
                return Ok(PopulateOutcome::AlreadyPopulated);
            }

            let rows = planning_units::insert_units(&tx, &missing, self.batch_size)?;
            tx.commit()?;

            info!(project = %target.project_id, rows, "Inserted planning units");
            Ok(PopulateOutcome::Inserted { rows: rows as u64 })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::projects::register_project;
    use crate::db::ProjectRegions;
    use crate::models::{DEFAULT_COST, DEFAULT_STATUS};
    use crate::scale::ScaleThresholds;
    use geo::polygon;

    fn cell(hex: &str, region: &str, resolution: u8) -> HexCell {
        HexCell {
            hex_index: hex.to_string(),
            resolution,
            scale: ScaleThresholds::default().classify(resolution),
            region_name: region.to_string(),
            boundary: polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
            cost: DEFAULT_COST,
            status: DEFAULT_STATUS,
        }
    }

    fn seeded_db(cells: &[HexCell]) -> GridDb {
        let db = GridDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| cells::append_cells(conn, cells, 500)).unwrap();
        db
    }

    fn target(project: &str, region: &str) -> ProjectTarget {
        ProjectTarget {
            project_id: project.to_string(),
            region_name: region.to_string(),
            resolution: None,
        }
    }

    #[test]
    fn test_missing_units_dedups_and_skips_assigned() {
        let mut expensive = cell("a", "Baltic", 3);
        expensive.cost = 4.0;
        let cells = vec![expensive, cell("a", "Baltic", 3), cell("b", "Baltic", 3), cell("c", "Baltic", 3)];
        let assigned: BTreeSet<String> = ["b".to_string()].into_iter().collect();

        let missing = missing_units("p1", &cells, &assigned);
        assert_eq!(missing.iter().map(|u| u.hex_index.as_str()).collect::<Vec<_>>(), ["a", "c"]);
        assert_eq!(missing[0].cost, 4.0);
    }

    #[test]
    fn test_second_run_inserts_nothing() {
        let db = seeded_db(&[cell("a", "Baltic", 3), cell("b", "Baltic", 3), cell("c", "Baltic", 3)]);
        let populator = PlanningUnitPopulator::default();

        assert_eq!(
            populator.populate(&db, &target("p1", "Baltic")).unwrap(),
            PopulateOutcome::Inserted { rows: 3 }
        );
        let after_first = db.with_conn(|conn| planning_units::units_for_project(conn, "p1")).unwrap();

        assert_eq!(
            populator.populate(&db, &target("p1", "Baltic")).unwrap(),
            PopulateOutcome::AlreadyPopulated
        );
        let after_second = db.with_conn(|conn| planning_units::units_for_project(conn, "p1")).unwrap();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_partial_run_converges() {
        let db = seeded_db(&[cell("a", "Baltic", 3), cell("b", "Baltic", 3), cell("c", "Baltic", 3)]);
        db.with_conn(|conn| {
            planning_units::insert_units(
                conn,
                &[ProjectPlanningUnit {
                    project_id: "p1".to_string(),
                    hex_index: "b".to_string(),
                    cost: 9.0,
                    status: 2,
                }],
                10,
            )
        })
        .unwrap();

        let outcome = PlanningUnitPopulator::new(1).populate(&db, &target("p1", "Baltic")).unwrap();
        assert_eq!(outcome, PopulateOutcome::Inserted { rows: 2 });

        let units = db.with_conn(|conn| planning_units::units_for_project(conn, "p1")).unwrap();
        assert_eq!(units.len(), 3);
        // The pre-existing assignment is left untouched
        assert_eq!(units[1].cost, 9.0);
        assert_eq!(units[1].status, 2);
    }

    #[test]
    fn test_region_without_grid_is_skipped() {
        let db = seeded_db(&[cell("a", "Baltic", 3)]);
        let outcome = PlanningUnitPopulator::default()
            .populate(&db, &target("p1", "Arctic"))
            .unwrap();
        assert_eq!(
            outcome,
            PopulateOutcome::NoGrid {
                region_name: "Arctic".to_string()
            }
        );
        assert_eq!(db.stats().unwrap().planning_unit_count, 0);
    }

    #[test]
    fn test_resolution_restricted_target() {
        let db = seeded_db(&[cell("a", "Baltic", 3), cell("b", "Baltic", 5), cell("c", "Baltic", 5)]);
        db.with_conn(|conn| crate::db::projects::register_project_at(conn, "p1", "Baltic", Some(5)))
            .unwrap();
        db.with_conn(|conn| register_project(conn, "p2", "Baltic")).unwrap();

        let populator = PlanningUnitPopulator::default();
        let p1 = db.target("p1").unwrap().unwrap();
        let p2 = db.target("p2").unwrap().unwrap();
        assert_eq!(populator.populate(&db, &p1).unwrap(), PopulateOutcome::Inserted { rows: 2 });
        assert_eq!(populator.populate(&db, &p2).unwrap(), PopulateOutcome::Inserted { rows: 3 });
    }
}
