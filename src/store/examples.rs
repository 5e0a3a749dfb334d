//! Few-shot example store
//!
//! Append-only. Rows are removed only with their project or by an external
//! retention job.

use anyhow::{Context, Result};
use rusqlite::{params, Row};

use super::{now, ActivityStore};
use crate::model::{AssignmentExample, EventRef};

fn map_example(row: &Row) -> rusqlite::Result<AssignmentExample> {
    Ok(AssignmentExample {
        id: row.get(0)?,
        project_id: row.get(1)?,
        event_type: row.get(2)?,
        event_id: row.get(3)?,
        context_json: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl ActivityStore {
    pub fn add_assignment_example(
        &self,
        project_id: i64,
        event: EventRef,
        context_json: &str,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO assignment_examples (project_id, event_type, event_id, context_json, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![project_id, event.event_type, event.event_id, context_json, now()],
            )
            .context("Failed to add assignment example")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent examples across all projects
    pub fn recent_assignment_examples(&self, limit: usize) -> Result<Vec<AssignmentExample>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, event_type, event_id, context_json, created_at
             FROM assignment_examples
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], map_example)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn project_assignment_examples(
        &self,
        project_id: i64,
        limit: usize,
    ) -> Result<Vec<AssignmentExample>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, event_type, event_id, context_json, created_at
             FROM assignment_examples
             WHERE project_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![project_id, limit as i64], map_example)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewProject;

    #[test]
    fn test_examples_newest_first() {
        let store = ActivityStore::open_in_memory().unwrap();
        let a = store.create_project(&NewProject::manual("A")).unwrap();
        let b = store.create_project(&NewProject::manual("B")).unwrap();

        let first = store
            .add_assignment_example(a.id, EventRef::focus(1), r#"{"appName":"Code"}"#)
            .unwrap();
        let second = store
            .add_assignment_example(b.id, EventRef::git(7), "not json")
            .unwrap();
        let third = store
            .add_assignment_example(a.id, EventRef::screenshot(3), "{}")
            .unwrap();

        let recent = store.recent_assignment_examples(10).unwrap();
        let ids: Vec<_> = recent.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![third, second, first]);
        assert_eq!(recent[1].event(), EventRef::git(7));
        assert!(recent[1].context().is_none());
        assert!(recent[0].context().is_some());

        let for_a = store.project_assignment_examples(a.id, 1).unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].id, third);
    }
}
