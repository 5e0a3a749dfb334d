//! Windowed assignment metrics

use anyhow::{Context, Result};
use rusqlite::params;

use super::ActivityStore;
use crate::model::AssignmentMetrics;

impl ActivityStore {
    /// Provenance and accuracy for assigned events with `start <= timestamp <= end`.
    ///
    /// A user row with `corrected_from` set started life as an automatic
    /// assignment, so it counts towards both `auto_assigned` and
    /// `corrections`.
    pub fn assignment_metrics(&self, start: i64, end: i64) -> Result<AssignmentMetrics> {
        let (total, rule, ai, user, corrections): (i64, i64, i64, i64, i64) = self
            .conn
            .query_row(
                r#"SELECT COUNT(*),
                          COALESCE(SUM(project_source = 'rule'), 0),
                          COALESCE(SUM(project_source = 'ai'), 0),
                          COALESCE(SUM(project_source = 'user'), 0),
                          COALESCE(SUM(corrected_from IS NOT NULL), 0)
                   FROM (
                       SELECT project_source, corrected_from FROM window_focus_events
                        WHERE project_id IS NOT NULL AND timestamp BETWEEN ?1 AND ?2
                       UNION ALL
                       SELECT project_source, corrected_from FROM screenshots
                        WHERE project_id IS NOT NULL AND timestamp BETWEEN ?1 AND ?2
                       UNION ALL
                       SELECT project_source, corrected_from FROM git_commits
                        WHERE project_id IS NOT NULL AND timestamp BETWEEN ?1 AND ?2
                   )"#,
                params![start, end],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .context("Failed to compute assignment metrics")?;

        let auto_assigned = rule + ai + corrections;
        let accuracy_rate = if auto_assigned == 0 {
            1.0
        } else {
            (auto_assigned - corrections) as f64 / auto_assigned as f64
        };

        Ok(AssignmentMetrics {
            period_start: start,
            period_end: end,
            total_activities: total,
            auto_assigned,
            rule_assigned: rule,
            ai_assigned: ai,
            user_assigned: user,
            corrections,
            accuracy_rate,
        })
    }
}
