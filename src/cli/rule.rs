use anyhow::Result;

use super::find_project;
use crate::engine::AssignmentEngine;
use crate::model::{MatchType, PatternType, RuleInput};

pub fn add(
    engine: &AssignmentEngine,
    project_query: String,
    pattern_type: PatternType,
    value: String,
    match_type: Option<MatchType>,
    weight: Option<f64>,
) -> Result<()> {
    let project = find_project(engine, &project_query)?;
    let pattern = engine.create_rule(&RuleInput {
        project_id: Some(project.id),
        pattern_type: Some(pattern_type),
        pattern_value: Some(value),
        match_type,
        weight,
    })?;
    println!(
        "Rule {} added to '{}': {} {} '{}' (weight {:.2})",
        pattern.id,
        project.name,
        pattern.pattern_type,
        pattern.match_type,
        pattern.pattern_value,
        pattern.weight
    );
    Ok(())
}

pub fn update(
    engine: &AssignmentEngine,
    pattern_id: i64,
    project: Option<String>,
    pattern_type: Option<PatternType>,
    value: Option<String>,
    match_type: Option<MatchType>,
    weight: Option<f64>,
) -> Result<()> {
    let project_id = match project {
        Some(query) => Some(find_project(engine, &query)?.id),
        None => None,
    };
    let pattern = engine.update_rule(
        pattern_id,
        &RuleInput {
            project_id,
            pattern_type,
            pattern_value: value,
            match_type,
            weight,
        },
    )?;
    println!(
        "Rule {} now: {} {} '{}' (weight {:.2})",
        pattern.id, pattern.pattern_type, pattern.match_type, pattern.pattern_value, pattern.weight
    );
    Ok(())
}

pub fn weight(engine: &AssignmentEngine, pattern_id: i64, weight: f64) -> Result<()> {
    engine.set_pattern_weight(pattern_id, weight)?;
    if let Some(pattern) = engine.store().get_pattern(pattern_id)? {
        println!("Rule {} weight set to {:.2}", pattern.id, pattern.weight);
    }
    Ok(())
}

pub fn delete(engine: &AssignmentEngine, pattern_id: i64) -> Result<()> {
    engine.delete_pattern(pattern_id)?;
    println!("Deleted rule {}", pattern_id);
    Ok(())
}

pub fn preview(
    engine: &AssignmentEngine,
    pattern_type: PatternType,
    value: String,
    match_type: Option<MatchType>,
) -> Result<()> {
    let preview = engine.preview_rule(&RuleInput {
        pattern_type: Some(pattern_type),
        pattern_value: Some(value),
        match_type,
        ..Default::default()
    })?;

    println!("{} matching events", preview.match_count);
    for sample in preview.sample_matches {
        println!("  {}", sample);
    }
    Ok(())
}

pub fn apply(engine: &AssignmentEngine, pattern_id: i64) -> Result<()> {
    let changed = engine.apply_rule_to_history(pattern_id)?;
    println!("Rule {} changed {} events", pattern_id, changed);
    Ok(())
}
