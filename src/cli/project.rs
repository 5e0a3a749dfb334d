use anyhow::Result;
use chrono::Utc;

use super::find_project;
use crate::engine::AssignmentEngine;
use crate::model::{NewProject, ProjectUpdate};

pub fn create(
    engine: &AssignmentEngine,
    name: String,
    color: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let project = engine.create_project(&NewProject {
        name,
        color,
        description,
        is_manual: true,
    })?;
    println!("Project '{}' created with ID: {}", project.name, project.id);
    Ok(())
}

pub fn list(engine: &AssignmentEngine) -> Result<()> {
    let projects = engine.list_projects()?;
    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    println!("{:<6} {:<24} {:<9} {:<8} {:<30}", "ID", "Name", "Color", "Patterns", "Description");
    println!("{}", "-".repeat(80));
    for p in projects {
        let patterns = engine.store().count_patterns(p.id)?;
        println!(
            "{:<6} {:<24} {:<9} {:<8} {:<30}",
            p.id, p.name, p.color, patterns, p.description
        );
    }
    Ok(())
}

pub fn update(
    engine: &AssignmentEngine,
    query: String,
    name: Option<String>,
    color: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let project = find_project(engine, &query)?;
    let updated = engine.update_project(
        project.id,
        &ProjectUpdate {
            name,
            color,
            description,
        },
    )?;
    println!("Updated project '{}' (ID {})", updated.name, updated.id);
    Ok(())
}

pub fn delete(engine: &AssignmentEngine, query: String) -> Result<()> {
    let project = find_project(engine, &query)?;
    let deletion = engine.delete_project(project.id)?;
    println!(
        "Deleted project '{}': {} events unassigned, {} patterns and {} examples removed",
        project.name, deletion.events_unassigned, deletion.patterns_removed, deletion.examples_removed
    );
    Ok(())
}

pub fn stats(engine: &AssignmentEngine, query: String) -> Result<()> {
    let project = find_project(engine, &query)?;
    let stats = engine.project_stats(project.id)?;

    println!("Project: {} (ID {})", project.name, project.id);
    println!("  Focus events:  {}", stats.focus_event_count);
    println!("  Screenshots:   {}", stats.screenshot_count);
    println!("  Git commits:   {}", stats.git_commit_count);
    println!("  Focus time:    {:.1} min", stats.total_minutes);
    println!("  Patterns:      {}", stats.pattern_count);
    Ok(())
}

pub fn patterns(engine: &AssignmentEngine, query: String) -> Result<()> {
    let project = find_project(engine, &query)?;
    let patterns = engine.list_patterns(project.id)?;
    if patterns.is_empty() {
        println!("No patterns for project '{}'.", project.name);
        return Ok(());
    }

    println!("{:<6} {:<13} {:<9} {:<7} {:<5} {:<30}", "ID", "Type", "Match", "Weight", "Hits", "Value");
    println!("{}", "-".repeat(75));
    for p in patterns {
        println!(
            "{:<6} {:<13} {:<9} {:<7.2} {:<5} {:<30}",
            p.id, p.pattern_type, p.match_type, p.weight, p.hit_count, p.pattern_value
        );
    }
    Ok(())
}

pub fn discover(engine: &AssignmentEngine, days: Option<u32>) -> Result<()> {
    let days = days.unwrap_or(engine.config().discovery.lookback_days);
    let since = Utc::now().timestamp() - i64::from(days) * 86_400;
    let created = engine.discover_projects(since)?;
    if created.is_empty() {
        println!("No new projects found in the last {} days.", days);
        return Ok(());
    }

    println!("Discovered {} projects:", created.len());
    for p in created {
        println!("  {:<6} {}", p.id, p.name);
    }
    Ok(())
}
