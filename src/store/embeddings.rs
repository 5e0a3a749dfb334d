//! Embedding index
//!
//! Vectors are computed elsewhere; this module stores them keyed by event and
//! remembers a hash of the text they were computed from. A hash mismatch is
//! the only signal that an event needs re-embedding.

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use super::{now, ActivityStore};
use crate::model::{ActivityEmbedding, EventRef, EventType};

/// A labelled vector from the ground-truth pool
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCandidate {
    pub event: EventRef,
    pub project_id: i64,
    pub embedding: Vec<f32>,
}

/// Deterministic hash of an embedding's source text
pub fn hash_context(context_text: &str) -> String {
    hex::encode(Sha256::digest(context_text.as_bytes()))
}

pub fn floats_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// `None` when the blob is not a whole number of f32s
pub fn bytes_to_floats(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

impl ActivityStore {
    /// Store the vector for an event, replacing any previous one
    pub fn upsert_embedding(&self, event: EventRef, embedding: &[f32], context_text: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO activity_embeddings
                 (event_type, event_id, embedding, context_text, context_hash, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(event_type, event_id) DO UPDATE SET
                     embedding = excluded.embedding,
                     context_text = excluded.context_text,
                     context_hash = excluded.context_hash,
                     created_at = excluded.created_at",
                params![
                    event.event_type,
                    event.event_id,
                    floats_to_bytes(embedding),
                    context_text,
                    hash_context(context_text),
                    now(),
                ],
            )
            .with_context(|| format!("Failed to save embedding for {}", event))?;
        Ok(())
    }

    pub fn get_embedding(&self, event: EventRef) -> Result<Option<ActivityEmbedding>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, embedding, context_text, context_hash, created_at
                 FROM activity_embeddings
                 WHERE event_type = ? AND event_id = ?",
                params![event.event_type, event.event_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(id, blob, context_text, context_hash, created_at)| {
            Some(ActivityEmbedding {
                id,
                event,
                embedding: bytes_to_floats(&blob)?,
                context_text,
                context_hash,
                created_at,
            })
        }))
    }

    /// True when there is no vector yet, or it was computed from other text
    pub fn needs_embedding(&self, event: EventRef, context_text: &str) -> Result<bool> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT context_hash FROM activity_embeddings WHERE event_type = ? AND event_id = ?",
                params![event.event_type, event.event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.map_or(true, |hash| hash != hash_context(context_text)))
    }

    /// Vectors of events that already carry a project (rule, ai or user),
    /// newest first, capped at `limit`
    pub fn labelled_embeddings(&self, limit: usize) -> Result<Vec<EmbeddingCandidate>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT e.event_type, e.event_id, e.embedding,
                      COALESCE(f.project_id, s.project_id, g.project_id) AS project_id
               FROM activity_embeddings e
               LEFT JOIN window_focus_events f
                   ON e.event_type = 'focus' AND f.id = e.event_id
                  AND f.project_source != 'unassigned'
               LEFT JOIN screenshots s
                   ON e.event_type = 'screenshot' AND s.id = e.event_id
                  AND s.project_source != 'unassigned'
               LEFT JOIN git_commits g
                   ON e.event_type = 'git' AND g.id = e.event_id
                  AND g.project_source != 'unassigned'
               JOIN projects p ON p.id = COALESCE(f.project_id, s.project_id, g.project_id)
               ORDER BY e.id DESC
               LIMIT ?"#,
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, EventType>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut candidates = vec![];
        for row in rows {
            let (event_type, event_id, blob, project_id) = row?;
            if let Some(embedding) = bytes_to_floats(&blob) {
                candidates.push(EmbeddingCandidate {
                    event: EventRef::new(event_type, event_id),
                    project_id,
                    embedding,
                });
            }
        }
        Ok(candidates)
    }
}
