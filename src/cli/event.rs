use anyhow::Result;

use super::find_project;
use crate::engine::AssignmentEngine;
use crate::model::{Assignment, EventRef};

fn describe(engine: &AssignmentEngine, assignment: &Assignment) -> Result<String> {
    let Some(project_id) = assignment.project_id else {
        return Ok("unassigned".to_string());
    };
    let name = engine
        .get_project(project_id)?
        .map(|p| p.name)
        .unwrap_or_else(|| format!("#{}", project_id));
    Ok(format!(
        "'{}' via {} (confidence {:.2})",
        name, assignment.source, assignment.confidence
    ))
}

pub fn assign(engine: &AssignmentEngine, event: EventRef) -> Result<()> {
    let assignment = engine.assign_event(event)?;
    println!("{} -> {}", event, describe(engine, &assignment)?);
    Ok(())
}

pub fn pin(engine: &AssignmentEngine, event: EventRef, project_query: String) -> Result<()> {
    let project = find_project(engine, &project_query)?;
    let outcome = engine.set_user_assignment(event, project.id)?;
    if outcome.assignment != Assignment::user(project.id) {
        anyhow::bail!("Project '{}' disappeared before the pin landed", project.name);
    }

    println!(
        "Pinned {} to '{}' ({} patterns learned{})",
        event,
        project.name,
        outcome.patterns_learned,
        if outcome.was_correction { ", correction" } else { "" }
    );
    Ok(())
}

pub fn unassign(engine: &AssignmentEngine, event: EventRef) -> Result<()> {
    engine.unassign_event(event)?;
    println!("Unassigned {}", event);
    Ok(())
}

pub fn unassigned_count(engine: &AssignmentEngine) -> Result<()> {
    println!("{} unassigned events", engine.unassigned_event_count()?);
    Ok(())
}
