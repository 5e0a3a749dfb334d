use anyhow::Result;
use chrono::NaiveDate;

use crate::engine::AssignmentEngine;

pub fn run(engine: &AssignmentEngine, from: NaiveDate, to: NaiveDate) -> Result<()> {
    if to < from {
        anyhow::bail!("--to ({}) is before --from ({})", to, from);
    }

    let start = from
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid start date: {}", from))?
        .and_utc()
        .timestamp();
    let end = to
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| anyhow::anyhow!("Invalid end date: {}", to))?
        .and_utc()
        .timestamp();

    let metrics = engine.assignment_metrics(start, end)?;
    println!("Assignment metrics {} .. {}", from, to);
    println!("  Assigned events:  {}", metrics.total_activities);
    println!(
        "  Automatic:        {} (rule {}, ai {})",
        metrics.auto_assigned, metrics.rule_assigned, metrics.ai_assigned
    );
    println!("  User assigned:    {}", metrics.user_assigned);
    println!("  Corrections:      {}", metrics.corrections);
    println!("  Accuracy:         {:.1}%", metrics.accuracy_rate * 100.0);
    Ok(())
}
