//! Event records and their assignment columns
//!
//! Events are written by the capture side; the engine reads their context and
//! owns only `project_id`, `project_confidence`, `project_source` and
//! `corrected_from`.

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use super::{now, ActivityStore};
use crate::model::{Assignment, EventRef, EventType, ProjectSource};

/// A focus interval as reported by the window tracker
#[derive(Debug, Clone)]
pub struct NewFocusEvent {
    pub timestamp: i64,
    pub end_time: i64,
    pub duration_seconds: f64,
    pub app_name: String,
    pub window_title: String,
    pub file_path: Option<String>,
}

impl NewFocusEvent {
    pub fn new(timestamp: i64, app_name: impl Into<String>, window_title: impl Into<String>) -> Self {
        Self {
            timestamp,
            end_time: timestamp,
            duration_seconds: 0.0,
            app_name: app_name.into(),
            window_title: window_title.into(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewScreenshot {
    pub timestamp: i64,
    pub filepath: String,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
}

impl NewScreenshot {
    pub fn new(timestamp: i64, filepath: impl Into<String>) -> Self {
        Self {
            timestamp,
            filepath: filepath.into(),
            app_name: None,
            window_title: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewGitCommit {
    pub timestamp: i64,
    pub commit_hash: String,
    pub repo_path: String,
    pub remote_url: Option<String>,
    pub branch: Option<String>,
    pub message_subject: String,
}

impl NewGitCommit {
    pub fn new(timestamp: i64, commit_hash: impl Into<String>, repo_path: impl Into<String>) -> Self {
        Self {
            timestamp,
            commit_hash: commit_hash.into(),
            repo_path: repo_path.into(),
            remote_url: None,
            branch: None,
            message_subject: String::new(),
        }
    }
}

/// One event with its raw context columns and current assignment
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event: EventRef,
    pub timestamp: i64,
    pub assignment: Assignment,
    pub corrected_from: Option<ProjectSource>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub file_path: Option<String>,
    pub repo_path: Option<String>,
    pub remote_url: Option<String>,
    pub branch: Option<String>,
}

/// Position of a batch sweep: the last event it finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepCheckpoint {
    pub timestamp: i64,
    pub event_type: EventType,
    pub event_id: i64,
}

/// Uniform column list across the three event tables
fn select_sql(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Focus => {
            "SELECT id, timestamp, project_id, project_confidence, project_source, corrected_from,
                    app_name, window_title, file_path, NULL, NULL, NULL
             FROM window_focus_events"
        }
        EventType::Screenshot => {
            "SELECT id, timestamp, project_id, project_confidence, project_source, corrected_from,
                    app_name, window_title, NULL, NULL, NULL, NULL
             FROM screenshots"
        }
        EventType::Git => {
            "SELECT id, timestamp, project_id, project_confidence, project_source, corrected_from,
                    NULL, NULL, NULL, repo_path, remote_url, branch
             FROM git_commits"
        }
    }
}

fn map_event(event_type: EventType, row: &Row) -> rusqlite::Result<EventRecord> {
    let source: ProjectSource = row.get(4)?;
    let assignment = if source == ProjectSource::Unassigned {
        Assignment::unassigned()
    } else {
        Assignment {
            project_id: row.get(2)?,
            confidence: row.get(3)?,
            source,
        }
    };

    Ok(EventRecord {
        event: EventRef::new(event_type, row.get(0)?),
        timestamp: row.get(1)?,
        assignment,
        corrected_from: row.get(5)?,
        app_name: row.get(6)?,
        window_title: row.get(7)?,
        file_path: row.get(8)?,
        repo_path: row.get(9)?,
        remote_url: row.get(10)?,
        branch: row.get(11)?,
    })
}

impl ActivityStore {
    // ============================================
    // INGESTION
    // ============================================

    pub fn insert_focus_event(&self, event: &NewFocusEvent) -> Result<EventRef> {
        self.conn
            .execute(
                "INSERT INTO window_focus_events
                 (timestamp, end_time, duration_seconds, app_name, window_title, file_path, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    event.timestamp,
                    event.end_time,
                    event.duration_seconds,
                    event.app_name,
                    event.window_title,
                    event.file_path,
                    now(),
                ],
            )
            .context("Failed to insert focus event")?;
        Ok(EventRef::focus(self.conn.last_insert_rowid()))
    }

    pub fn insert_screenshot(&self, shot: &NewScreenshot) -> Result<EventRef> {
        self.conn
            .execute(
                "INSERT INTO screenshots (timestamp, filepath, app_name, window_title, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    shot.timestamp,
                    shot.filepath,
                    shot.app_name,
                    shot.window_title,
                    now()
                ],
            )
            .context("Failed to insert screenshot")?;
        Ok(EventRef::screenshot(self.conn.last_insert_rowid()))
    }

    pub fn insert_git_commit(&self, commit: &NewGitCommit) -> Result<EventRef> {
        self.conn
            .execute(
                "INSERT INTO git_commits
                 (timestamp, commit_hash, repo_path, remote_url, branch, message_subject, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    commit.timestamp,
                    commit.commit_hash,
                    commit.repo_path,
                    commit.remote_url,
                    commit.branch,
                    commit.message_subject,
                    now(),
                ],
            )
            .context("Failed to insert git commit")?;
        Ok(EventRef::git(self.conn.last_insert_rowid()))
    }

    // ============================================
    // READS
    // ============================================

    pub fn get_event(&self, event: EventRef) -> Result<Option<EventRecord>> {
        let sql = format!("{} WHERE id = ?", select_sql(event.event_type));
        self.conn
            .query_row(&sql, params![event.event_id], |row| {
                map_event(event.event_type, row)
            })
            .optional()
            .with_context(|| format!("Failed to load event {}", event))
    }

    /// Visit every event of every kind, oldest first within each kind
    pub fn for_each_event<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&EventRecord) -> Result<()>,
    {
        for event_type in EventType::ALL {
            let sql = format!("{} ORDER BY timestamp, id", select_sql(event_type));
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| map_event(event_type, row))?;
            for row in rows {
                visit(&row?)?;
            }
        }
        Ok(())
    }

    /// Count of events across all kinds still waiting for a project
    pub fn unassigned_event_count(&self) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM screenshots WHERE project_source = 'unassigned')
                  + (SELECT COUNT(*) FROM window_focus_events WHERE project_source = 'unassigned')
                  + (SELECT COUNT(*) FROM git_commits WHERE project_source = 'unassigned')",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ============================================
    // DISCOVERY
    // ============================================

    /// Repositories committed to since `since`, remote URL preferred over
    /// the local path
    pub fn recent_repositories(&self, since: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT COALESCE(NULLIF(TRIM(remote_url), ''), repo_path) AS repo
             FROM git_commits
             WHERE timestamp >= ?
             ORDER BY repo",
        )?;
        let rows = stmt.query_map(params![since], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Apps focused at least `min_events` times since `since`, busiest first
    pub fn recurring_apps(&self, since: i64, min_events: usize) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT TRIM(app_name) AS app, COUNT(*) AS n
             FROM window_focus_events
             WHERE timestamp >= ?1 AND TRIM(app_name) != ''
             GROUP BY app
             HAVING n >= ?2
             ORDER BY n DESC, app ASC",
        )?;
        let rows = stmt.query_map(params![since, min_events as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ============================================
    // ASSIGNMENT WRITES
    // ============================================

    /// Write a rule/ai/unassigned result. A single guarded statement: it
    /// never touches a user pin and never points at a missing project.
    /// Returns whether the row was written.
    pub fn write_automatic_assignment(&self, event: EventRef, assignment: &Assignment) -> Result<bool> {
        debug_assert!(assignment.source != ProjectSource::User);

        let (project_id, confidence, source) = match assignment.project_id {
            Some(pid) if assignment.source != ProjectSource::Unassigned => {
                (Some(pid), assignment.confidence.clamp(0.0, 1.0), assignment.source)
            }
            _ => (None, 0.0, ProjectSource::Unassigned),
        };

        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET project_id = ?1, project_confidence = ?2, project_source = ?3
                 WHERE id = ?4 AND project_source != 'user'
                   AND (?1 IS NULL OR EXISTS (SELECT 1 FROM projects WHERE id = ?1))",
                event.event_type.table()
            ),
            params![project_id, confidence, source, event.event_id],
        )?;
        Ok(changed > 0)
    }

    /// Pin an event to a project. The prior source is evaluated inside the
    /// same statement: a pin over rule/ai output records `corrected_from`,
    /// a pin over an unassigned event clears it, a re-pin keeps it.
    /// Returns false when the event or the project does not exist.
    pub fn write_user_assignment(&self, event: EventRef, project_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET project_id = ?1, project_confidence = 1.0, project_source = 'user',
                        corrected_from = CASE
                            WHEN project_source IN ('rule', 'ai') THEN project_source
                            WHEN project_source = 'unassigned' THEN NULL
                            ELSE corrected_from END
                 WHERE id = ?2 AND EXISTS (SELECT 1 FROM projects WHERE id = ?1)",
                event.event_type.table()
            ),
            params![project_id, event.event_id],
        )?;
        Ok(changed > 0)
    }

    /// Reset any state, including a pin, back to unassigned
    pub fn clear_assignment(&self, event: EventRef) -> Result<bool> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET project_id = NULL, project_confidence = 0,
                        project_source = 'unassigned', corrected_from = NULL
                 WHERE id = ?",
                event.event_type.table()
            ),
            params![event.event_id],
        )?;
        Ok(changed > 0)
    }

    // ============================================
    // SWEEP
    // ============================================

    /// Next batch of sweepable events after `after`, ordered by
    /// `(timestamp, event_type, id)`. Pinned events are never returned;
    /// rule/ai events only when `include_automatic` is set.
    pub fn events_for_sweep(
        &self,
        after: Option<&SweepCheckpoint>,
        include_automatic: bool,
        limit: usize,
    ) -> Result<Vec<(EventRef, i64)>> {
        let (ts, kind, id) = match after {
            Some(cp) => (cp.timestamp, cp.event_type.as_str(), cp.event_id),
            None => (i64::MIN, "", i64::MIN),
        };

        let mut stmt = self.conn.prepare(
            r#"SELECT event_type, id, timestamp FROM (
                   SELECT 'focus' AS event_type, id, timestamp, project_source FROM window_focus_events
                   UNION ALL
                   SELECT 'screenshot', id, timestamp, project_source FROM screenshots
                   UNION ALL
                   SELECT 'git', id, timestamp, project_source FROM git_commits
               )
               WHERE project_source != 'user'
                 AND (?1 OR project_source = 'unassigned')
                 AND (timestamp, event_type, id) > (?2, ?3, ?4)
               ORDER BY timestamp, event_type, id
               LIMIT ?5"#,
        )?;

        let rows = stmt.query_map(
            params![include_automatic, ts, kind, id, limit as i64],
            |row| {
                let event_type: EventType = row.get(0)?;
                Ok((EventRef::new(event_type, row.get(1)?), row.get::<_, i64>(2)?))
            },
        )?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn load_checkpoint(&self, name: &str) -> Result<Option<SweepCheckpoint>> {
        self.conn
            .query_row(
                "SELECT timestamp, event_type, event_id FROM sweep_state WHERE name = ?",
                params![name],
                |row| {
                    Ok(SweepCheckpoint {
                        timestamp: row.get(0)?,
                        event_type: row.get(1)?,
                        event_id: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to load sweep checkpoint")
    }

    pub fn save_checkpoint(&self, name: &str, checkpoint: &SweepCheckpoint) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sweep_state (name, timestamp, event_type, event_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                 timestamp = excluded.timestamp,
                 event_type = excluded.event_type,
                 event_id = excluded.event_id,
                 updated_at = excluded.updated_at",
            params![
                name,
                checkpoint.timestamp,
                checkpoint.event_type,
                checkpoint.event_id,
                now()
            ],
        )?;
        Ok(())
    }

    pub fn clear_checkpoint(&self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sweep_state WHERE name = ?", params![name])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewProject;

    fn rule(project_id: i64) -> Assignment {
        Assignment {
            project_id: Some(project_id),
            confidence: 0.5,
            source: ProjectSource::Rule,
        }
    }

    #[test]
    fn test_automatic_write_never_overrides_pin() {
        let store = ActivityStore::open_in_memory().unwrap();
        let a = store.create_project(&NewProject::manual("A")).unwrap();
        let b = store.create_project(&NewProject::manual("B")).unwrap();
        let event = store
            .insert_focus_event(&NewFocusEvent::new(10, "Code", "x"))
            .unwrap();

        assert!(store.write_user_assignment(event, a.id).unwrap());
        assert!(!store.write_automatic_assignment(event, &rule(b.id)).unwrap());
        assert!(!store
            .write_automatic_assignment(event, &Assignment::unassigned())
            .unwrap());

        let record = store.get_event(event).unwrap().unwrap();
        assert_eq!(record.assignment, Assignment::user(a.id));
        assert_eq!(record.corrected_from, None);
    }

    #[test]
    fn test_automatic_write_rejects_missing_project() {
        let store = ActivityStore::open_in_memory().unwrap();
        let event = store
            .insert_screenshot(&NewScreenshot::new(10, "/s.webp"))
            .unwrap();

        assert!(!store.write_automatic_assignment(event, &rule(42)).unwrap());
        assert!(!store.write_user_assignment(event, 42).unwrap());
        assert_eq!(
            store.get_event(event).unwrap().unwrap().assignment,
            Assignment::unassigned()
        );
    }

    #[test]
    fn test_pin_over_rule_records_correction() {
        let store = ActivityStore::open_in_memory().unwrap();
        let a = store.create_project(&NewProject::manual("A")).unwrap();
        let b = store.create_project(&NewProject::manual("B")).unwrap();
        let event = store
            .insert_git_commit(&NewGitCommit::new(10, "deadbeef", "/src/a"))
            .unwrap();

        assert!(store.write_automatic_assignment(event, &rule(a.id)).unwrap());
        assert!(store.write_user_assignment(event, b.id).unwrap());
        // a second pin keeps the original automatic source
        assert!(store.write_user_assignment(event, a.id).unwrap());

        let record = store.get_event(event).unwrap().unwrap();
        assert_eq!(record.assignment, Assignment::user(a.id));
        assert_eq!(record.corrected_from, Some(ProjectSource::Rule));
        assert_eq!(record.repo_path.as_deref(), Some("/src/a"));
    }

    #[test]
    fn test_correction_forgotten_once_unassigned() {
        let store = ActivityStore::open_in_memory().unwrap();
        let a = store.create_project(&NewProject::manual("A")).unwrap();
        let b = store.create_project(&NewProject::manual("B")).unwrap();
        let event = store
            .insert_focus_event(&NewFocusEvent::new(10, "Code", "x"))
            .unwrap();

        store.write_automatic_assignment(event, &rule(a.id)).unwrap();
        store.write_user_assignment(event, b.id).unwrap();
        store.clear_assignment(event).unwrap();
        assert_eq!(store.get_event(event).unwrap().unwrap().corrected_from, None);

        // a pin straight from unassigned is not a correction
        store.write_user_assignment(event, b.id).unwrap();
        assert_eq!(store.get_event(event).unwrap().unwrap().corrected_from, None);

        store.clear_assignment(event).unwrap();
        store.write_automatic_assignment(event, &rule(a.id)).unwrap();
        store.write_user_assignment(event, b.id).unwrap();
        store.delete_project(b.id).unwrap();
        let record = store.get_event(event).unwrap().unwrap();
        assert_eq!(record.assignment, Assignment::unassigned());
        assert_eq!(record.corrected_from, None);
    }

    #[test]
    fn test_sweep_listing_order_and_resume() {
        let store = ActivityStore::open_in_memory().unwrap();
        let a = store.create_project(&NewProject::manual("A")).unwrap();

        let late = store
            .insert_focus_event(&NewFocusEvent::new(300, "Code", "late"))
            .unwrap();
        let early = store
            .insert_screenshot(&NewScreenshot::new(100, "/1.webp"))
            .unwrap();
        let pinned = store
            .insert_focus_event(&NewFocusEvent::new(150, "Code", "pinned"))
            .unwrap();
        let tied_git = store
            .insert_git_commit(&NewGitCommit::new(300, "c0ffee", "/src/a"))
            .unwrap();
        let ruled = store
            .insert_focus_event(&NewFocusEvent::new(200, "Code", "ruled"))
            .unwrap();

        store.write_user_assignment(pinned, a.id).unwrap();
        store.write_automatic_assignment(ruled, &rule(a.id)).unwrap();

        let batch = store.events_for_sweep(None, false, 10).unwrap();
        let refs: Vec<_> = batch.iter().map(|(e, _)| *e).collect();
        assert_eq!(refs, vec![early, late, tied_git]);

        let all = store.events_for_sweep(None, true, 2).unwrap();
        assert_eq!(all.iter().map(|(e, _)| *e).collect::<Vec<_>>(), vec![early, ruled]);

        let checkpoint = SweepCheckpoint {
            timestamp: all[1].1,
            event_type: all[1].0.event_type,
            event_id: all[1].0.event_id,
        };
        store.save_checkpoint("default", &checkpoint).unwrap();
        let resumed = store.load_checkpoint("default").unwrap().unwrap();
        assert_eq!(resumed, checkpoint);

        let rest = store.events_for_sweep(Some(&resumed), true, 10).unwrap();
        assert_eq!(rest.iter().map(|(e, _)| *e).collect::<Vec<_>>(), vec![late, tied_git]);

        store.clear_checkpoint("default").unwrap();
        assert!(store.load_checkpoint("default").unwrap().is_none());
    }

    #[test]
    fn test_unassigned_count() {
        let store = ActivityStore::open_in_memory().unwrap();
        let a = store.create_project(&NewProject::manual("A")).unwrap();
        let e1 = store
            .insert_focus_event(&NewFocusEvent::new(1, "Code", "x"))
            .unwrap();
        store.insert_screenshot(&NewScreenshot::new(2, "/2.webp")).unwrap();
        store
            .insert_git_commit(&NewGitCommit::new(3, "abc", "/src"))
            .unwrap();
        assert_eq!(store.unassigned_event_count().unwrap(), 3);

        store.write_user_assignment(e1, a.id).unwrap();
        assert_eq!(store.unassigned_event_count().unwrap(), 2);

        store.clear_assignment(e1).unwrap();
        assert_eq!(store.unassigned_event_count().unwrap(), 3);
    }
}
