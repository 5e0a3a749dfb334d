//! Checkpointed batch re-evaluation
//!
//! Events are visited in `(timestamp, event_type, id)` order. After each
//! batch the position of its last event is saved under the sweep's name, so
//! a restarted sweep continues where the previous one stopped. Re-running an
//! event is harmless: assignment is idempotent for unchanged inputs.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::AssignmentEngine;
use crate::model::{Assignment, ProjectSource};
use crate::store::SweepCheckpoint;

/// Which events a sweep revisits. Pinned events are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepScope {
    /// Only events still waiting for a project
    Unassigned,
    /// Unassigned plus rule and ai decisions
    Automatic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub processed: usize,
    pub rule: usize,
    pub ai: usize,
    pub unassigned: usize,
    /// Pinned by someone else while the sweep ran
    pub pinned: usize,
    #[serde(skip)]
    pub checkpoint: Option<SweepCheckpoint>,
    /// No events remain after the checkpoint
    pub done: bool,
}

impl SweepReport {
    fn record(&mut self, assignment: &Assignment) {
        self.processed += 1;
        match assignment.source {
            ProjectSource::Rule => self.rule += 1,
            ProjectSource::Ai => self.ai += 1,
            ProjectSource::Unassigned => self.unassigned += 1,
            ProjectSource::User => self.pinned += 1,
        }
    }

    /// Fold a later batch into this report
    pub fn merge(&mut self, batch: SweepReport) {
        self.processed += batch.processed;
        self.rule += batch.rule;
        self.ai += batch.ai;
        self.unassigned += batch.unassigned;
        self.pinned += batch.pinned;
        if batch.checkpoint.is_some() {
            self.checkpoint = batch.checkpoint;
        }
        self.done = batch.done;
    }
}

impl AssignmentEngine {
    /// Process one batch after the checkpoint stored under `name`, then
    /// advance it
    pub fn sweep_batch(&self, name: &str, scope: SweepScope, batch_size: usize) -> Result<SweepReport> {
        let batch_size = batch_size.max(1);
        let after = self.store.load_checkpoint(name)?;
        let events = self.store.events_for_sweep(
            after.as_ref(),
            scope == SweepScope::Automatic,
            batch_size,
        )?;

        let mut report = SweepReport {
            done: events.len() < batch_size,
            checkpoint: after,
            ..Default::default()
        };

        for (event, timestamp) in events {
            let assignment = self.assign_event(event)?;
            report.record(&assignment);
            report.checkpoint = Some(SweepCheckpoint {
                timestamp,
                event_type: event.event_type,
                event_id: event.event_id,
            });
        }

        if let Some(checkpoint) = &report.checkpoint {
            self.store.save_checkpoint(name, checkpoint)?;
        }
        Ok(report)
    }

    /// Run batches until nothing is left after the checkpoint
    pub fn sweep(&self, name: &str, scope: SweepScope) -> Result<SweepReport> {
        let batch_size = self.config.sweep.batch_size;
        let mut report = SweepReport::default();
        loop {
            let batch = self.sweep_batch(name, scope, batch_size)?;
            let done = batch.done;
            report.merge(batch);
            if done {
                break;
            }
        }

        info!(
            sweep = name,
            processed = report.processed,
            rule = report.rule,
            ai = report.ai,
            unassigned = report.unassigned,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Forget a sweep's position so the next run starts from the beginning
    pub fn reset_sweep(&self, name: &str) -> Result<()> {
        self.store.clear_checkpoint(name)
    }
}
