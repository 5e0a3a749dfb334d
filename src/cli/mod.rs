//! Command handlers behind the `worktrail` binary

pub mod embeddings;
pub mod event;
pub mod metrics;
pub mod project;
pub mod rule;
pub mod sweep;

use anyhow::Result;

use crate::engine::AssignmentEngine;
use crate::model::Project;

/// Find a project by numeric id or exact name
pub(crate) fn find_project(engine: &AssignmentEngine, query: &str) -> Result<Project> {
    if let Ok(id) = query.parse::<i64>() {
        if let Some(project) = engine.get_project(id)? {
            return Ok(project);
        }
    }
    engine
        .get_project_by_name(query)?
        .ok_or_else(|| anyhow::anyhow!("Project not found: {}", query))
}
