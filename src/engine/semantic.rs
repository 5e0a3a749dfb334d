//! Semantic matcher: nearest neighbours over labelled embeddings

use std::collections::{BTreeMap, HashSet};

use crate::config::SemanticConfig;
use crate::model::EventRef;
use crate::store::EmbeddingCandidate;

/// Accepted similarity decision
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMatch {
    pub project_id: i64,
    /// Winner's share of the neighbours' similarity mass
    pub confidence: f64,
    /// Best single similarity among the winner's neighbours
    pub top_similarity: f64,
    pub neighbours: usize,
}

/// Cosine similarity; 0 for mismatched dimensions or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Combine the assigned-event pool with few-shot examples. An event's own
/// current assignment wins over an example label for the same event, and
/// the query event never votes for itself.
pub fn merge_ground_truth(
    labelled: Vec<EmbeddingCandidate>,
    examples: Vec<EmbeddingCandidate>,
    query: EventRef,
) -> Vec<EmbeddingCandidate> {
    let mut seen: HashSet<EventRef> = HashSet::new();
    labelled
        .into_iter()
        .chain(examples)
        .filter(|c| c.event != query && seen.insert(c.event))
        .collect()
}

/// Similarity-weighted vote among the top-K neighbours of `query`
pub fn nearest_project(
    query: &[f32],
    candidates: &[EmbeddingCandidate],
    config: &SemanticConfig,
) -> Option<SemanticMatch> {
    let mut neighbours: Vec<(f64, &EmbeddingCandidate)> = candidates
        .iter()
        .map(|c| (cosine_similarity(query, &c.embedding), c))
        .filter(|(sim, _)| *sim >= config.min_similarity)
        .collect();

    neighbours.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then(a.event.cmp(&b.event)));
    neighbours.truncate(config.top_k);
    if neighbours.is_empty() {
        return None;
    }

    // (mass, best similarity) per project
    let mut votes: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
    let mut total = 0.0;
    for (sim, c) in &neighbours {
        let entry = votes.entry(c.project_id).or_insert((0.0, 0.0));
        entry.0 += sim;
        entry.1 = entry.1.max(*sim);
        total += sim;
    }

    let mut winner: Option<(i64, (f64, f64))> = None;
    for (pid, vote) in votes {
        if winner.map_or(true, |(_, best)| vote.0 > best.0) {
            winner = Some((pid, vote));
        }
    }
    let (project_id, (mass, top_similarity)) = winner?;

    if total <= 0.0 {
        return None;
    }
    let confidence = mass / total;
    if confidence <= config.min_confidence {
        return None;
    }

    Some(SemanticMatch {
        project_id,
        confidence,
        top_similarity,
        neighbours: neighbours.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(event: EventRef, project_id: i64, embedding: &[f32]) -> EmbeddingCandidate {
        EmbeddingCandidate {
            event,
            project_id,
            embedding: embedding.to_vec(),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_identical_neighbour_gives_full_confidence() {
        let pool = vec![candidate(EventRef::focus(1), 3, &[0.6, 0.8])];
        let m = nearest_project(&[0.6, 0.8], &pool, &SemanticConfig::default()).unwrap();
        assert_eq!(m.project_id, 3);
        assert!((m.confidence - 1.0).abs() < 1e-9);
        assert_eq!(m.neighbours, 1);
    }

    #[test]
    fn test_vote_share_and_threshold() {
        let config = SemanticConfig::default();
        let pool = vec![
            candidate(EventRef::focus(1), 1, &[1.0, 0.0]),
            candidate(EventRef::focus(2), 1, &[1.0, 0.1]),
            candidate(EventRef::focus(3), 2, &[1.0, 0.05]),
            // too dissimilar to count
            candidate(EventRef::focus(4), 2, &[0.0, 1.0]),
        ];
        let m = nearest_project(&[1.0, 0.0], &pool, &config).unwrap();
        assert_eq!(m.project_id, 1);
        assert!(m.confidence > 0.6 && m.confidence < 0.7);
        assert_eq!(m.neighbours, 3);

        // an even split never clears a strict 0.5
        let split = vec![
            candidate(EventRef::focus(1), 1, &[1.0, 0.0]),
            candidate(EventRef::focus(2), 2, &[1.0, 0.0]),
        ];
        assert!(nearest_project(&[1.0, 0.0], &split, &config).is_none());
    }

    #[test]
    fn test_top_k_keeps_closest() {
        let config = SemanticConfig {
            top_k: 1,
            ..Default::default()
        };
        let pool = vec![
            candidate(EventRef::git(1), 1, &[1.0, 0.3]),
            candidate(EventRef::git(2), 2, &[1.0, 0.0]),
        ];
        let m = nearest_project(&[1.0, 0.0], &pool, &config).unwrap();
        assert_eq!(m.project_id, 2);
        assert_eq!(m.neighbours, 1);
    }

    #[test]
    fn test_merge_prefers_current_assignment() {
        let query = EventRef::screenshot(9);
        let labelled = vec![candidate(EventRef::focus(1), 1, &[1.0])];
        let examples = vec![
            candidate(EventRef::focus(1), 2, &[1.0]),
            candidate(EventRef::focus(5), 2, &[1.0]),
            candidate(query, 2, &[1.0]),
        ];

        let merged = merge_ground_truth(labelled, examples, query);
        let summary: Vec<_> = merged.iter().map(|c| (c.event, c.project_id)).collect();
        assert_eq!(summary, vec![(EventRef::focus(1), 1), (EventRef::focus(5), 2)]);
    }
}
