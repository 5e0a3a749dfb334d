//! Assignment coordinator
//!
//! Resolution order for one event: a user pin is final; otherwise the rule
//! matcher decides; if it abstains the semantic matcher may; if both abstain
//! the event is unassigned. Pins feed back into the pattern store and the
//! few-shot examples, after which the cached pattern snapshot is dropped.

pub mod context;
mod discovery;
pub mod rules;
pub mod semantic;
mod sweep;

use std::cell::RefCell;

use anyhow::{Context as _, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::model::{
    Assignment, AssignmentContext, AssignmentMetrics, EventRef, MatchType, NewProject,
    Project, ProjectPattern, ProjectSource, ProjectStats, ProjectUpdate, RuleInput,
};
use crate::store::{
    hash_context, validate_pattern, ActivityStore, EmbeddingCandidate, EventRecord,
    NewFocusEvent, NewGitCommit, NewScreenshot, ProjectDeletion,
};

use self::context::{build_context_text, extract_context, learned_patterns};
use self::rules::{PatternSnapshot, RuleMatch};
use self::semantic::{merge_ground_truth, nearest_project, SemanticMatch};

pub use self::sweep::{SweepReport, SweepScope};

const PREVIEW_SAMPLES: usize = 5;

pub struct AssignmentEngine {
    store: ActivityStore,
    config: Config,
    snapshot: RefCell<Option<PatternSnapshot>>,
}

/// Result of pinning an event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinOutcome {
    pub assignment: Assignment,
    /// The pin replaced a rule or ai decision
    pub was_correction: bool,
    pub patterns_learned: usize,
}

/// What a candidate rule would match, computed without writing it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePreview {
    pub match_count: usize,
    pub sample_matches: Vec<String>,
}

/// An event whose embedding is missing or computed from outdated text
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEmbedding {
    pub event: EventRef,
    pub context_text: String,
}

impl AssignmentEngine {
    pub fn new(store: ActivityStore, config: Config) -> Self {
        Self {
            store,
            config,
            snapshot: RefCell::new(None),
        }
    }

    pub fn store(&self) -> &ActivityStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drop the cached patterns; the next match reloads them
    pub fn invalidate_patterns(&self) {
        self.snapshot.replace(None);
    }

    // ============================================
    // ASSIGNMENT
    // ============================================

    /// Decide and persist the project for one event. A pinned event is
    /// returned as is.
    pub fn assign_event(&self, event: EventRef) -> Result<Assignment> {
        let record = self.load_event(event)?;
        if record.assignment.is_pinned() {
            return Ok(record.assignment);
        }

        let assignment = self.evaluate(&record)?;
        if self.store.write_automatic_assignment(event, &assignment)? {
            debug!(
                event = %event,
                project_id = ?assignment.project_id,
                source = %assignment.source,
                confidence = assignment.confidence,
                "Assigned event"
            );
            return Ok(assignment);
        }

        // The guarded write lost a race: either a pin landed or the project
        // was deleted underneath us
        let current = self.load_event(event)?;
        if current.assignment.is_pinned() {
            return Ok(current.assignment);
        }

        warn!(
            event = %event,
            project_id = ?assignment.project_id,
            "Chosen project no longer exists, leaving event unassigned"
        );
        self.invalidate_patterns();
        self.store
            .write_automatic_assignment(event, &Assignment::unassigned())?;
        Ok(Assignment::unassigned())
    }

    /// Current decision for an event without writing it
    fn evaluate(&self, record: &EventRecord) -> Result<Assignment> {
        let ctx = extract_context(record);

        if let Some(m) = self.rule_match(&ctx)? {
            debug!(event = %record.event, reason = %m.reason, score = m.score, "Rule match");
            return Ok(Assignment {
                project_id: Some(m.project_id),
                confidence: m.confidence,
                source: ProjectSource::Rule,
            });
        }

        if let Some(m) = self.semantic_match(record.event, &ctx)? {
            debug!(
                event = %record.event,
                neighbours = m.neighbours,
                similarity = m.top_similarity,
                "Semantic match"
            );
            return Ok(Assignment {
                project_id: Some(m.project_id),
                confidence: m.confidence,
                source: ProjectSource::Ai,
            });
        }

        Ok(Assignment::unassigned())
    }

    /// Pin an event to a project, then learn from it. The pin, the learned
    /// patterns and the few-shot example commit together.
    pub fn set_user_assignment(&self, event: EventRef, project_id: i64) -> Result<PinOutcome> {
        let tx = self.store.transaction()?;
        let record = self.load_event(event)?;

        if !self.store.write_user_assignment(event, project_id)? {
            warn!(event = %event, project_id, "Cannot pin to a missing project");
            return Ok(PinOutcome {
                assignment: record.assignment,
                was_correction: false,
                patterns_learned: 0,
            });
        }

        let ctx = extract_context(&record);
        let learned = learned_patterns(&ctx);
        for p in &learned {
            self.store.upsert_pattern(
                project_id,
                p.pattern_type,
                &p.value,
                p.match_type,
                p.initial_weight,
            )?;
        }

        let context_json = serde_json::to_string(&ctx).context("Failed to encode context")?;
        self.store
            .add_assignment_example(project_id, event, &context_json)?;

        tx.commit().context("Failed to commit assignment")?;
        self.invalidate_patterns();

        let was_correction = record.assignment.source.is_automatic();
        info!(
            event = %event,
            project_id,
            patterns = learned.len(),
            correction = was_correction,
            "Pinned event"
        );

        Ok(PinOutcome {
            assignment: Assignment::user(project_id),
            was_correction,
            patterns_learned: learned.len(),
        })
    }

    /// Clear any assignment, including a pin. Patterns and examples stay.
    pub fn unassign_event(&self, event: EventRef) -> Result<Assignment> {
        if !self.store.clear_assignment(event)? {
            return Err(not_found_event(event));
        }
        debug!(event = %event, "Unassigned event");
        Ok(Assignment::unassigned())
    }

    /// Rule-only suggestion for an arbitrary context
    pub fn suggest_project(&self, ctx: &AssignmentContext) -> Result<Option<RuleMatch>> {
        self.rule_match(ctx)
    }

    fn load_event(&self, event: EventRef) -> Result<EventRecord> {
        self.store
            .get_event(event)?
            .ok_or_else(|| not_found_event(event))
    }

    fn rule_match(&self, ctx: &AssignmentContext) -> Result<Option<RuleMatch>> {
        let mut cached = self.snapshot.borrow_mut();
        let ttl = self.config.cache.ttl();
        if cached.as_ref().map_or(true, |s| s.is_expired(ttl)) {
            let snapshot = PatternSnapshot::new(self.store.list_all_patterns()?);
            debug!(patterns = snapshot.len(), "Loaded pattern snapshot");
            *cached = Some(snapshot);
        }
        Ok(cached
            .as_ref()
            .and_then(|s| s.match_context(ctx, &self.config.rules)))
    }

    fn semantic_match(&self, event: EventRef, ctx: &AssignmentContext) -> Result<Option<SemanticMatch>> {
        let Some(stored) = self.store.get_embedding(event)? else {
            return Ok(None);
        };
        if stored.context_hash != hash_context(&build_context_text(ctx)) {
            debug!(event = %event, "Embedding is stale, skipping semantic match");
            return Ok(None);
        }

        let semantic = &self.config.semantic;
        let labelled = self.store.labelled_embeddings(semantic.max_candidates)?;
        let examples = self.example_candidates()?;
        let pool = merge_ground_truth(labelled, examples, event);

        Ok(nearest_project(&stored.embedding, &pool, semantic))
    }

    /// Embeddings of recent few-shot examples, labelled with the example's
    /// project
    fn example_candidates(&self) -> Result<Vec<EmbeddingCandidate>> {
        let examples = self
            .store
            .recent_assignment_examples(self.config.semantic.few_shot_limit)?;

        let mut candidates = Vec::with_capacity(examples.len());
        for example in examples {
            if example.context().is_none() {
                debug!(example_id = example.id, "Skipping example with malformed context");
                continue;
            }
            if let Some(stored) = self.store.get_embedding(example.event())? {
                candidates.push(EmbeddingCandidate {
                    event: stored.event,
                    project_id: example.project_id,
                    embedding: stored.embedding,
                });
            }
        }
        Ok(candidates)
    }

    // ============================================
    // INLINE INGESTION
    // ============================================

    pub fn record_focus_event(&self, event: &NewFocusEvent) -> Result<(EventRef, Assignment)> {
        let event = self.store.insert_focus_event(event)?;
        Ok((event, self.assign_event(event)?))
    }

    pub fn record_screenshot(&self, shot: &NewScreenshot) -> Result<(EventRef, Assignment)> {
        let event = self.store.insert_screenshot(shot)?;
        Ok((event, self.assign_event(event)?))
    }

    pub fn record_git_commit(&self, commit: &NewGitCommit) -> Result<(EventRef, Assignment)> {
        let event = self.store.insert_git_commit(commit)?;
        Ok((event, self.assign_event(event)?))
    }

    // ============================================
    // PROJECTS
    // ============================================

    pub fn create_project(&self, project: &NewProject) -> Result<Project> {
        let project = self.store.create_project(project)?;
        info!(project_id = project.id, name = %project.name, "Created project");
        Ok(project)
    }

    pub fn update_project(&self, id: i64, update: &ProjectUpdate) -> Result<Project> {
        self.store.update_project(id, update)
    }

    pub fn delete_project(&self, id: i64) -> Result<ProjectDeletion> {
        let deletion = self.store.delete_project(id)?;
        self.invalidate_patterns();
        Ok(deletion)
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.store.get_project(id)
    }

    pub fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        self.store.get_project_by_name(name)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.store.list_projects()
    }

    pub fn project_stats(&self, project_id: i64) -> Result<ProjectStats> {
        if !self.store.project_exists(project_id)? {
            return Err(EngineError::NotFound {
                kind: "project",
                id: project_id,
            }
            .into());
        }
        self.store.get_project_stats(project_id)
    }

    pub fn list_patterns(&self, project_id: i64) -> Result<Vec<ProjectPattern>> {
        self.store.list_patterns(project_id)
    }

    pub fn assignment_metrics(&self, start: i64, end: i64) -> Result<AssignmentMetrics> {
        self.store.assignment_metrics(start, end)
    }

    pub fn unassigned_event_count(&self) -> Result<i64> {
        self.store.unassigned_event_count()
    }

    // ============================================
    // RULES
    // ============================================

    pub fn create_rule(&self, input: &RuleInput) -> Result<ProjectPattern> {
        let pattern = self.store.create_rule(input)?;
        self.invalidate_patterns();
        Ok(pattern)
    }

    pub fn update_rule(&self, pattern_id: i64, input: &RuleInput) -> Result<ProjectPattern> {
        let pattern = self.store.update_rule(pattern_id, input)?;
        self.invalidate_patterns();
        Ok(pattern)
    }

    pub fn set_pattern_weight(&self, pattern_id: i64, weight: f64) -> Result<()> {
        self.store.set_pattern_weight(pattern_id, weight)?;
        self.invalidate_patterns();
        Ok(())
    }

    pub fn delete_pattern(&self, pattern_id: i64) -> Result<()> {
        if !self.store.delete_pattern(pattern_id)? {
            return Err(EngineError::NotFound {
                kind: "pattern",
                id: pattern_id,
            }
            .into());
        }
        self.invalidate_patterns();
        Ok(())
    }

    /// Events a candidate rule would fire on, with up to five sample labels
    pub fn preview_rule(&self, input: &RuleInput) -> Result<RulePreview> {
        let pattern_type = input
            .pattern_type
            .ok_or_else(|| anyhow::anyhow!("patternType is required"))?;
        let value = input.pattern_value.clone().unwrap_or_default();
        let match_type = input.match_type.unwrap_or(MatchType::Contains);
        validate_pattern(&value, match_type)?;

        let candidate = ProjectPattern {
            id: 0,
            project_id: input.project_id.unwrap_or_default(),
            pattern_type,
            pattern_value: value,
            match_type,
            weight: input.weight.unwrap_or(1.0),
            hit_count: 0,
            last_used_at: None,
            created_at: 0,
        };

        let mut preview = RulePreview::default();
        self.store.for_each_event(|record| {
            let ctx = extract_context(record);
            if PatternSnapshot::pattern_matches(&candidate, &ctx) {
                preview.match_count += 1;
                if preview.sample_matches.len() < PREVIEW_SAMPLES {
                    preview.sample_matches.push(sample_label(&ctx, record.event));
                }
            }
            Ok(())
        })?;
        Ok(preview)
    }

    /// Re-run assignment on every unpinned event a stored rule fires on.
    /// Returns how many events changed.
    pub fn apply_rule_to_history(&self, pattern_id: i64) -> Result<usize> {
        let pattern = self.store.get_pattern(pattern_id)?.ok_or(EngineError::NotFound {
            kind: "pattern",
            id: pattern_id,
        })?;

        let mut targets = vec![];
        self.store.for_each_event(|record| {
            if !record.assignment.is_pinned()
                && PatternSnapshot::pattern_matches(&pattern, &extract_context(record))
            {
                targets.push((record.event, record.assignment));
            }
            Ok(())
        })?;

        let mut changed = 0;
        for (event, before) in targets {
            if self.assign_event(event)? != before {
                changed += 1;
            }
        }
        info!(pattern_id, changed, "Applied rule to history");
        Ok(changed)
    }

    // ============================================
    // EMBEDDINGS
    // ============================================

    /// Events the inference side should (re-)embed, with the exact text to
    /// embed. Events with no usable context are left out.
    pub fn pending_embeddings(&self, limit: usize) -> Result<Vec<PendingEmbedding>> {
        let mut pending = vec![];
        self.store.for_each_event(|record| {
            if pending.len() >= limit {
                return Ok(());
            }
            let context_text = build_context_text(&extract_context(record));
            if !context_text.is_empty() && self.store.needs_embedding(record.event, &context_text)? {
                pending.push(PendingEmbedding {
                    event: record.event,
                    context_text,
                });
            }
            Ok(())
        })?;
        Ok(pending)
    }

    /// Store a vector computed for `event`'s current context
    pub fn store_embedding(&self, event: EventRef, embedding: &[f32]) -> Result<()> {
        let record = self.load_event(event)?;
        let context_text = build_context_text(&extract_context(&record));
        self.store.upsert_embedding(event, embedding, &context_text)
    }
}

fn not_found_event(event: EventRef) -> anyhow::Error {
    EngineError::NotFound {
        kind: event.event_type.as_str(),
        id: event.event_id,
    }
    .into()
}

fn sample_label(ctx: &AssignmentContext, event: EventRef) -> String {
    ctx.window_title
        .clone()
        .or_else(|| ctx.git_repo.clone())
        .or_else(|| ctx.app_name.clone())
        .unwrap_or_else(|| event.to_string())
}
