//! Project → region mapping
//!
//! Projects are created by the project management layer. The populator only
//! needs to know which region (and optionally which resolution) a project
//! draws its planning units from.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::GridError;

/// Where a project draws its planning units from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTarget {
    pub project_id: String,
    pub region_name: String,
    /// Restrict to one resolution; `None` takes every generated resolution
    pub resolution: Option<u8>,
}

/// Source of project → region lookups
pub trait ProjectRegions {
    /// Target of one project, `None` if the project is unknown
    fn target(&self, project_id: &str) -> Result<Option<ProjectTarget>, GridError>;

    /// Every known project, ordered by id
    fn all_projects(&self) -> Result<Vec<ProjectTarget>, GridError>;
}

/// Static mapping, project id → region name
impl ProjectRegions for BTreeMap<String, String> {
    fn target(&self, project_id: &str) -> Result<Option<ProjectTarget>, GridError> {
        Ok(self.get(project_id).map(|region_name| ProjectTarget {
            project_id: project_id.to_string(),
            region_name: region_name.clone(),
            resolution: None,
        }))
    }

    fn all_projects(&self) -> Result<Vec<ProjectTarget>, GridError> {
        Ok(self
            .iter()
            .map(|(project_id, region_name)| ProjectTarget {
                project_id: project_id.clone(),
                region_name: region_name.clone(),
                resolution: None,
            })
            .collect())
    }
}

/// The store's `projects` table
impl ProjectRegions for Connection {
    fn target(&self, project_id: &str) -> Result<Option<ProjectTarget>, GridError> {
        let target = self
            .query_row(
                "SELECT project_id, region_name, resolution FROM projects WHERE project_id = ?",
                params![project_id],
                target_from_row,
            )
            .optional()?;
        Ok(target)
    }

    fn all_projects(&self) -> Result<Vec<ProjectTarget>, GridError> {
        let mut stmt =
            self.prepare("SELECT project_id, region_name, resolution FROM projects ORDER BY project_id")?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(targets)
    }
}

fn target_from_row(row: &rusqlite::Row) -> Result<ProjectTarget, rusqlite::Error> {
    let resolution = row
        .get::<_, Option<i64>>(2)?
        .map(u8::try_from)
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(e)))?;
    Ok(ProjectTarget {
        project_id: row.get(0)?,
        region_name: row.get(1)?,
        resolution,
    })
}

/// Record or replace a project's region
pub fn register_project(conn: &Connection, project_id: &str, region_name: &str) -> Result<(), GridError> {
    register_project_at(conn, project_id, region_name, None)
}

/// Record or replace a project's region, restricted to one resolution
pub fn register_project_at(
    conn: &Connection,
    project_id: &str,
    region_name: &str,
    resolution: Option<u8>,
) -> Result<(), GridError> {
    conn.execute(
        "INSERT INTO projects (project_id, region_name, resolution) VALUES (?, ?, ?)
         ON CONFLICT(project_id) DO UPDATE SET
            region_name = excluded.region_name,
            resolution = excluded.resolution",
        params![project_id, region_name, resolution.map(i64::from)],
    )?;
    Ok(())
}
