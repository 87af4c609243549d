//! Project planning unit storage

use std::collections::BTreeSet;

use rusqlite::{params, params_from_iter, Connection};
use tracing::debug;

use super::rows_per_statement;
use crate::error::GridError;
use crate::models::ProjectPlanningUnit;

/// Columns bound per unit in a multi-row insert
const INSERT_COLUMNS: usize = 4;

/// Hex indexes already assigned to a project
pub fn assigned_indexes(conn: &Connection, project_id: &str) -> Result<BTreeSet<String>, GridError> {
    let mut stmt = conn.prepare("SELECT hex_index FROM project_planning_units WHERE project_id = ?")?;
    let indexes = stmt
        .query_map(params![project_id], |row| row.get(0))?
        .collect::<Result<BTreeSet<String>, _>>()?;
    Ok(indexes)
}

/// Planning units of a project, ordered by hex index
pub fn units_for_project(conn: &Connection, project_id: &str) -> Result<Vec<ProjectPlanningUnit>, GridError> {
    let mut stmt = conn.prepare(
        "SELECT project_id, hex_index, cost, status FROM project_planning_units
         WHERE project_id = ? ORDER BY hex_index",
    )?;
    let units = stmt
        .query_map(params![project_id], |row| {
            Ok(ProjectPlanningUnit {
                project_id: row.get(0)?,
                hex_index: row.get(1)?,
                cost: row.get(2)?,
                status: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(units)
}

/// Insert units with multi-row `INSERT`s of at most `batch_size` rows.
///
/// Runs on the caller's connection or transaction; a (project, hex) pair that
/// already exists fails the statement through the primary key.
pub fn insert_units(
    conn: &Connection,
    units: &[ProjectPlanningUnit],
    batch_size: usize,
) -> Result<usize, GridError> {
    let mut written = 0;
    for chunk in units.chunks(rows_per_statement(batch_size, INSERT_COLUMNS)) {
        let placeholders = vec!["(?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO project_planning_units (project_id, hex_index, cost, status) VALUES {}",
            placeholders
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(chunk.len() * INSERT_COLUMNS);
        for unit in chunk {
            values.push(unit.project_id.clone().into());
            values.push(unit.hex_index.clone().into());
            values.push(unit.cost.into());
            values.push(unit.status.into());
        }

        written += conn.execute(&sql, params_from_iter(values))?;
    }
    debug!(rows = written, "Inserted planning units");
    Ok(written)
}

/// Number of planning units assigned to a project
pub fn count_units(conn: &Connection, project_id: &str) -> Result<u64, GridError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM project_planning_units WHERE project_id = ?",
        params![project_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    fn unit(project: &str, hex: &str) -> ProjectPlanningUnit {
        ProjectPlanningUnit {
            project_id: project.to_string(),
            hex_index: hex.to_string(),
            cost: 1.0,
            status: 0,
        }
    }

    #[test]
    fn test_insert_and_list() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let units = vec![unit("p1", "b"), unit("p1", "a"), unit("p1", "c")];
        assert_eq!(insert_units(&conn, &units, 2).unwrap(), 3);
        insert_units(&conn, &[unit("p2", "a")], 2).unwrap();

        let listed = units_for_project(&conn, "p1").unwrap();
        assert_eq!(listed.iter().map(|u| u.hex_index.as_str()).collect::<Vec<_>>(), ["a", "b", "c"]);
        assert_eq!(count_units(&conn, "p2").unwrap(), 1);
        assert_eq!(
            assigned_indexes(&conn, "p1").unwrap(),
            ["a", "b", "c"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn test_duplicate_pair_rejected_by_key() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        insert_units(&conn, &[unit("p1", "a")], 10).unwrap();
        assert!(matches!(
            insert_units(&conn, &[unit("p1", "a")], 10),
            Err(GridError::Database(_))
        ));
        assert_eq!(count_units(&conn, "p1").unwrap(), 1);
    }

    #[test]
    fn test_oversized_batch_is_split() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let units: Vec<_> = (0..9000).map(|i| unit("p1", &format!("h{}", i))).collect();
        assert_eq!(insert_units(&conn, &units, 50_000).unwrap(), 9000);
        assert_eq!(count_units(&conn, "p1").unwrap(), 9000);
    }
}
