//! Activity storage with SQLite
//!
//! One `ActivityStore` wraps one connection. The capture daemon and the
//! reclassification UI each open their own store on the same file; every
//! state transition below is a single statement or a single transaction so
//! the two can interleave safely.

mod embeddings;
mod events;
mod examples;
mod metrics;
mod patterns;
mod schema;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{NewProject, Project, ProjectStats, ProjectUpdate, DEFAULT_PROJECT_COLOR};

pub use embeddings::{bytes_to_floats, floats_to_bytes, hash_context, EmbeddingCandidate};
pub use events::{EventRecord, NewFocusEvent, NewGitCommit, NewScreenshot, SweepCheckpoint};
pub use patterns::validate_pattern;
pub use schema::SCHEMA;

pub struct ActivityStore {
    conn: Connection,
}

/// What a project deletion touched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectDeletion {
    pub events_unassigned: usize,
    pub patterns_removed: usize,
    pub examples_removed: usize,
}

impl ActivityStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        // WAL lets the sweep read while the tracker appends
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode = WAL;") {
            warn!(error = %e, "Could not enable WAL, using the default journal");
        }
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Open a transaction on this store's connection. Store methods called
    /// while it is live run inside it; dropping it without `commit` rolls
    /// everything back.
    pub fn transaction(&self) -> Result<rusqlite::Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .context("Failed to begin transaction")
    }

    // ============================================
    // PROJECTS
    // ============================================

    /// Create a new project. Names are unique.
    pub fn create_project(&self, project: &NewProject) -> Result<Project> {
        let name = project.name.trim();
        let color = project
            .color
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_PROJECT_COLOR);
        let description = project.description.as_deref().unwrap_or_default();
        let now = now();

        let result = self.conn.execute(
            "INSERT INTO projects (name, color, description, is_manual, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![name, color, description, project.is_manual, now],
        );

        match result {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(EngineError::DuplicateProjectName(name.to_string()).into())
            }
            Err(e) => return Err(e).context("Failed to create project"),
        }

        Ok(Project {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            color: color.to_string(),
            description: description.to_string(),
            is_manual: project.is_manual,
            created_at: now,
            updated_at: None,
        })
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, name, color, description, is_manual, created_at, updated_at
                 FROM projects WHERE id = ?",
                params![id],
                map_project,
            )
            .optional()
            .context("Failed to get project")
    }

    pub fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let result = self.conn.query_row(
            "SELECT id, name, color, description, is_manual, created_at, updated_at
             FROM projects WHERE name = ?",
            params![name],
            map_project,
        );

        match result {
            Ok(project) => Ok(Some(project)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn project_exists(&self, id: i64) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, color, description, is_manual, created_at, updated_at
             FROM projects
             ORDER BY name ASC",
        )?;

        let rows = stmt.query_map([], map_project)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Update a project; unset fields keep their current values
    pub fn update_project(&self, id: i64, update: &ProjectUpdate) -> Result<Project> {
        let result = self.conn.execute(
            "UPDATE projects SET
                 name = COALESCE(?1, name),
                 color = COALESCE(?2, color),
                 description = COALESCE(?3, description),
                 updated_at = ?4
             WHERE id = ?5",
            params![
                update.name.as_deref().map(str::trim),
                update.color,
                update.description,
                now(),
                id
            ],
        );

        let changed = match result {
            Ok(n) => n,
            Err(e) if is_constraint_violation(&e) => {
                let name = update.name.clone().unwrap_or_default();
                return Err(EngineError::DuplicateProjectName(name).into());
            }
            Err(e) => return Err(e).context("Failed to update project"),
        };

        if changed == 0 {
            return Err(EngineError::NotFound { kind: "project", id }.into());
        }

        self.get_project(id)?
            .ok_or_else(|| EngineError::NotFound { kind: "project", id }.into())
    }

    /// Delete a project. Its patterns and examples go with it; events that
    /// pointed at it are reset to unassigned but kept.
    pub fn delete_project(&self, id: i64) -> Result<ProjectDeletion> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deletion = ProjectDeletion::default();

        for event_type in crate::model::EventType::ALL {
            deletion.events_unassigned += tx.execute(
                &format!(
                    "UPDATE {} SET project_id = NULL, project_confidence = 0,
                            project_source = 'unassigned', corrected_from = NULL
                     WHERE project_id = ?",
                    event_type.table()
                ),
                params![id],
            )?;
        }

        deletion.patterns_removed =
            tx.execute("DELETE FROM project_patterns WHERE project_id = ?", params![id])?;
        deletion.examples_removed = tx.execute(
            "DELETE FROM assignment_examples WHERE project_id = ?",
            params![id],
        )?;

        let removed = tx.execute("DELETE FROM projects WHERE id = ?", params![id])?;
        if removed == 0 {
            return Err(EngineError::NotFound { kind: "project", id }.into());
        }

        tx.commit().context("Failed to delete project")?;

        info!(
            project_id = id,
            events = deletion.events_unassigned,
            patterns = deletion.patterns_removed,
            examples = deletion.examples_removed,
            "Deleted project"
        );
        Ok(deletion)
    }

    /// Aggregate counts for one project
    pub fn get_project_stats(&self, project_id: i64) -> Result<ProjectStats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, params![project_id], |row| row.get(0))?)
        };

        Ok(ProjectStats {
            screenshot_count: count("SELECT COUNT(*) FROM screenshots WHERE project_id = ?")?,
            focus_event_count: count(
                "SELECT COUNT(*) FROM window_focus_events WHERE project_id = ?",
            )?,
            git_commit_count: count("SELECT COUNT(*) FROM git_commits WHERE project_id = ?")?,
            total_minutes: self.conn.query_row(
                "SELECT COALESCE(SUM(duration_seconds), 0) / 60.0
                 FROM window_focus_events WHERE project_id = ?",
                params![project_id],
                |row| row.get(0),
            )?,
            pattern_count: self.count_patterns(project_id)?,
        })
    }
}

// ============================================
// HELPERS
// ============================================

pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

fn map_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        description: row.get(3)?,
        is_manual: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

/// True when the error chain bottoms out in SQLITE_BUSY or SQLITE_LOCKED.
/// The engine never retries these itself; callers decide on backoff.
pub fn is_contention(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
        )
    })
}
