//! Pattern store: weighted matching rules per project
//!
//! Reinforcement is frequency based. Each repeat confirmation bumps
//! `hit_count` and grows `weight` by 10% until it reaches the 2.0 cap. The
//! whole bump is one `INSERT ... ON CONFLICT DO UPDATE`, so two writers
//! confirming the same context at once both land.

use anyhow::{Context, Result};
use regex::Regex;
use rusqlite::{params, OptionalExtension, Row};

use super::{now, ActivityStore};
use crate::error::EngineError;
use crate::model::{
    clamp_weight, MatchType, PatternType, ProjectPattern, RuleInput, MAX_PATTERN_WEIGHT,
};

const REINFORCEMENT_FACTOR: f64 = 1.1;

const PATTERN_COLUMNS: &str = "id, project_id, pattern_type, pattern_value, match_type,
                               weight, hit_count, last_used_at, created_at";

fn map_pattern(row: &Row) -> rusqlite::Result<ProjectPattern> {
    Ok(ProjectPattern {
        id: row.get(0)?,
        project_id: row.get(1)?,
        pattern_type: row.get(2)?,
        pattern_value: row.get(3)?,
        match_type: row.get(4)?,
        weight: row.get(5)?,
        hit_count: row.get(6)?,
        last_used_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Reject values the matcher could never use
pub fn validate_pattern(value: &str, match_type: MatchType) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::EmptyPatternValue);
    }
    if match_type == MatchType::Regex {
        Regex::new(value).map_err(|source| EngineError::InvalidRegex {
            pattern: value.to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Stored form of a pattern value. Matching is case-insensitive, so plain
/// values are kept lowercased to share one uniqueness key. Regexes are kept
/// as typed since case changes their escapes (`\d` vs `\D`).
fn normalize_value(value: &str, match_type: MatchType) -> String {
    match match_type {
        MatchType::Regex => value.trim().to_string(),
        _ => value.trim().to_lowercase(),
    }
}

fn validate_weight(weight: f64) -> Result<f64, EngineError> {
    if weight.is_finite() {
        Ok(clamp_weight(weight))
    } else {
        Err(EngineError::InvalidWeight(weight))
    }
}

impl ActivityStore {
    /// Insert a pattern at `initial_weight`, or reinforce the existing one
    /// with the same `(project, type, value, match)` key. Returns its id.
    pub fn upsert_pattern(
        &self,
        project_id: i64,
        pattern_type: PatternType,
        pattern_value: &str,
        match_type: MatchType,
        initial_weight: f64,
    ) -> Result<i64> {
        validate_pattern(pattern_value, match_type)?;
        let weight = validate_weight(initial_weight)?;
        let pattern_value = normalize_value(pattern_value, match_type);

        let id = self
            .conn
            .query_row(
                "INSERT INTO project_patterns
                 (project_id, pattern_type, pattern_value, match_type, weight, hit_count,
                  last_used_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
                 ON CONFLICT(project_id, pattern_type, pattern_value, match_type) DO UPDATE SET
                     hit_count = hit_count + 1,
                     last_used_at = excluded.last_used_at,
                     weight = CASE WHEN weight < ?7 THEN MIN(weight * ?8, ?7) ELSE weight END
                 RETURNING id",
                params![
                    project_id,
                    pattern_type,
                    pattern_value,
                    match_type,
                    weight,
                    now(),
                    MAX_PATTERN_WEIGHT,
                    REINFORCEMENT_FACTOR,
                ],
                |row| row.get(0),
            )
            .context("Failed to upsert pattern")?;
        Ok(id)
    }

    /// Manually tune a weight; out-of-range values are clamped
    pub fn set_pattern_weight(&self, pattern_id: i64, weight: f64) -> Result<()> {
        let weight = validate_weight(weight)?;
        let changed = self.conn.execute(
            "UPDATE project_patterns SET weight = ? WHERE id = ?",
            params![weight, pattern_id],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound {
                kind: "pattern",
                id: pattern_id,
            }
            .into());
        }
        Ok(())
    }

    pub fn get_pattern(&self, pattern_id: i64) -> Result<Option<ProjectPattern>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM project_patterns WHERE id = ?", PATTERN_COLUMNS),
                params![pattern_id],
                map_pattern,
            )
            .optional()
            .context("Failed to get pattern")
    }

    /// Patterns of one project, strongest first
    pub fn list_patterns(&self, project_id: i64) -> Result<Vec<ProjectPattern>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM project_patterns
             WHERE project_id = ?
             ORDER BY weight DESC, hit_count DESC, id ASC",
            PATTERN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id], map_pattern)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Every pattern, strongest first. Feeds the matcher snapshot.
    pub fn list_all_patterns(&self) -> Result<Vec<ProjectPattern>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM project_patterns
             ORDER BY weight DESC, hit_count DESC, id ASC",
            PATTERN_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_pattern)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn count_patterns(&self, project_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM project_patterns WHERE project_id = ?",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn delete_pattern(&self, pattern_id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM project_patterns WHERE id = ?", params![pattern_id])?;
        Ok(changed > 0)
    }

    // ============================================
    // OPERATOR RULES
    // ============================================

    /// Create a rule by hand. Defaults: `contains`, weight 1.0. An existing
    /// identical rule is reinforced rather than duplicated.
    pub fn create_rule(&self, input: &RuleInput) -> Result<ProjectPattern> {
        let project_id = input
            .project_id
            .ok_or_else(|| anyhow::anyhow!("projectId is required"))?;
        let pattern_type = input
            .pattern_type
            .ok_or_else(|| anyhow::anyhow!("patternType is required"))?;
        let value = input.pattern_value.as_deref().unwrap_or_default();
        let match_type = input.match_type.unwrap_or(MatchType::Contains);
        let weight = input.weight.unwrap_or(1.0);

        if !self.project_exists(project_id)? {
            return Err(EngineError::NotFound {
                kind: "project",
                id: project_id,
            }
            .into());
        }

        let id = self.upsert_pattern(project_id, pattern_type, value, match_type, weight)?;
        self.get_pattern(id)?
            .ok_or_else(|| EngineError::NotFound { kind: "pattern", id }.into())
    }

    /// Edit a rule in place, possibly moving it to another project; unset
    /// fields keep their stored values
    pub fn update_rule(&self, pattern_id: i64, input: &RuleInput) -> Result<ProjectPattern> {
        let existing = self.get_pattern(pattern_id)?.ok_or(EngineError::NotFound {
            kind: "pattern",
            id: pattern_id,
        })?;

        let project_id = input.project_id.unwrap_or(existing.project_id);
        if project_id != existing.project_id && !self.project_exists(project_id)? {
            return Err(EngineError::NotFound {
                kind: "project",
                id: project_id,
            }
            .into());
        }

        let pattern_type = input.pattern_type.unwrap_or(existing.pattern_type);
        let value = input
            .pattern_value
            .clone()
            .unwrap_or_else(|| existing.pattern_value.clone());
        let match_type = input.match_type.unwrap_or(existing.match_type);
        let weight = validate_weight(input.weight.unwrap_or(existing.weight))?;
        validate_pattern(&value, match_type)?;
        let value = normalize_value(&value, match_type);

        self.conn
            .execute(
                "UPDATE project_patterns
                 SET project_id = ?, pattern_type = ?, pattern_value = ?, match_type = ?, weight = ?
                 WHERE id = ?",
                params![project_id, pattern_type, value, match_type, weight, pattern_id],
            )
            .context("Failed to update rule")?;

        self.get_pattern(pattern_id)?.ok_or_else(|| {
            EngineError::NotFound {
                kind: "pattern",
                id: pattern_id,
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewProject, MIN_PATTERN_WEIGHT};

    fn store_with_project() -> (ActivityStore, i64) {
        let store = ActivityStore::open_in_memory().unwrap();
        let project = store.create_project(&NewProject::manual("Traq")).unwrap();
        (store, project.id)
    }

    #[test]
    fn test_reinforcement_saturates_at_cap() {
        let (store, pid) = store_with_project();

        let id = store
            .upsert_pattern(pid, PatternType::GitRepo, "traq", MatchType::Contains, 1.0)
            .unwrap();

        let mut previous = store.get_pattern(id).unwrap().unwrap();
        assert_eq!(previous.hit_count, 1);
        assert_eq!(previous.weight, 1.0);

        for _ in 0..20 {
            let again = store
                .upsert_pattern(pid, PatternType::GitRepo, "traq", MatchType::Contains, 1.0)
                .unwrap();
            assert_eq!(again, id);

            let current = store.get_pattern(id).unwrap().unwrap();
            assert_eq!(current.hit_count, previous.hit_count + 1);
            assert!(current.weight >= previous.weight);
            assert!(current.weight <= MAX_PATTERN_WEIGHT);
            previous = current;
        }
        assert_eq!(previous.weight, MAX_PATTERN_WEIGHT);
    }

    #[test]
    fn test_initial_and_manual_weights_are_clamped() {
        let (store, pid) = store_with_project();

        let id = store
            .upsert_pattern(pid, PatternType::AppName, "code", MatchType::Exact, 9.0)
            .unwrap();
        assert_eq!(store.get_pattern(id).unwrap().unwrap().weight, MAX_PATTERN_WEIGHT);

        store.set_pattern_weight(id, -3.0).unwrap();
        assert_eq!(store.get_pattern(id).unwrap().unwrap().weight, MIN_PATTERN_WEIGHT);

        store.set_pattern_weight(id, 1.25).unwrap();
        assert_eq!(store.get_pattern(id).unwrap().unwrap().weight, 1.25);

        let err = store.set_pattern_weight(id, f64::NAN).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidWeight(_))
        ));
        assert!(store.set_pattern_weight(404, 1.0).is_err());
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        let (store, pid) = store_with_project();

        let err = store
            .upsert_pattern(pid, PatternType::WindowTitle, "([unclosed", MatchType::Regex, 1.0)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidRegex { .. })
        ));

        let err = store
            .upsert_pattern(pid, PatternType::Domain, "  ", MatchType::Exact, 1.0)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::EmptyPatternValue)
        ));
        assert!(store.list_all_patterns().unwrap().is_empty());
    }

    #[test]
    fn test_listing_order() {
        let (store, pid) = store_with_project();
        let low = store
            .upsert_pattern(pid, PatternType::WindowTitle, "traq", MatchType::Contains, 0.3)
            .unwrap();
        let high = store
            .upsert_pattern(pid, PatternType::GitRepo, "traq", MatchType::Contains, 1.0)
            .unwrap();
        let mid = store
            .upsert_pattern(pid, PatternType::AppName, "code", MatchType::Exact, 0.5)
            .unwrap();

        let ids: Vec<_> = store.list_patterns(pid).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![high, mid, low]);
        assert_eq!(store.count_patterns(pid).unwrap(), 3);

        assert!(store.delete_pattern(mid).unwrap());
        assert!(!store.delete_pattern(mid).unwrap());
        assert_eq!(store.list_all_patterns().unwrap().len(), 2);
    }

    #[test]
    fn test_rule_create_and_update() {
        let (store, pid) = store_with_project();

        let rule = store
            .create_rule(&RuleInput {
                project_id: Some(pid),
                pattern_type: Some(PatternType::Domain),
                pattern_value: Some("portainer.io".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rule.match_type, MatchType::Contains);
        assert_eq!(rule.weight, 1.0);

        let updated = store
            .update_rule(
                rule.id,
                &RuleInput {
                    match_type: Some(MatchType::Suffix),
                    weight: Some(1.5),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.pattern_value, "portainer.io");
        assert_eq!(updated.match_type, MatchType::Suffix);
        assert_eq!(updated.weight, 1.5);

        let missing_project = store.create_rule(&RuleInput {
            project_id: Some(999),
            pattern_type: Some(PatternType::AppName),
            pattern_value: Some("code".to_string()),
            ..Default::default()
        });
        assert!(missing_project.is_err());
    }

    #[test]
    fn test_values_differing_in_case_share_a_row() {
        let (store, pid) = store_with_project();

        let manual = store
            .create_rule(&RuleInput {
                project_id: Some(pid),
                pattern_type: Some(PatternType::AppName),
                pattern_value: Some(" Code ".to_string()),
                match_type: Some(MatchType::Exact),
                weight: Some(0.5),
            })
            .unwrap();
        assert_eq!(manual.pattern_value, "code");

        let learned = store
            .upsert_pattern(pid, PatternType::AppName, "code", MatchType::Exact, 0.5)
            .unwrap();
        assert_eq!(learned, manual.id);
        assert_eq!(store.get_pattern(learned).unwrap().unwrap().hit_count, 2);

        // regex case is meaningful and kept
        let id = store
            .upsert_pattern(pid, PatternType::WindowTitle, r"\D+Traq", MatchType::Regex, 1.0)
            .unwrap();
        assert_eq!(store.get_pattern(id).unwrap().unwrap().pattern_value, r"\D+Traq");
    }

    #[test]
    fn test_update_moves_rule_between_projects() {
        let (store, pid) = store_with_project();
        let other = store.create_project(&NewProject::manual("Other")).unwrap();
        let id = store
            .upsert_pattern(pid, PatternType::GitRepo, "traq", MatchType::Contains, 1.0)
            .unwrap();

        let moved = store
            .update_rule(
                id,
                &RuleInput {
                    project_id: Some(other.id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(moved.project_id, other.id);
        assert_eq!(store.count_patterns(pid).unwrap(), 0);

        let err = store
            .update_rule(
                id,
                &RuleInput {
                    project_id: Some(999),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NotFound { kind: "project", id: 999 })
        ));
        assert_eq!(store.get_pattern(id).unwrap().unwrap().project_id, other.id);
    }
}
