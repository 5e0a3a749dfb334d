//! Rule matcher
//!
//! Scores a context against an in-memory snapshot of every stored pattern.
//! Each matching pattern contributes `weight * specificity` to its project;
//! the highest total wins if it clears the acceptance threshold.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::config::RulesConfig;
use crate::model::{AssignmentContext, MatchType, PatternType, ProjectPattern};

/// A pattern prepared for matching
#[derive(Debug, Clone)]
struct CompiledPattern {
    pattern: ProjectPattern,
    needle: String,
    regex: Option<Regex>,
}

impl CompiledPattern {
    fn compile(pattern: ProjectPattern) -> Option<Self> {
        let regex = match pattern.match_type {
            MatchType::Regex => match RegexBuilder::new(&pattern.pattern_value)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern_id = pattern.id, error = %e, "Skipping pattern with invalid regex");
                    return None;
                }
            },
            _ => None,
        };

        Some(Self {
            needle: pattern.pattern_value.to_lowercase(),
            pattern,
            regex,
        })
    }

    /// `value` must already be lowercased
    fn matches(&self, value: &str) -> bool {
        if value.is_empty() || self.needle.is_empty() {
            return false;
        }
        match self.pattern.match_type {
            MatchType::Exact => value == self.needle,
            MatchType::Contains => value.contains(&self.needle),
            MatchType::Prefix => value.starts_with(&self.needle),
            MatchType::Suffix => value.ends_with(&self.needle),
            MatchType::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }
}

/// Immutable view of the pattern store, grouped by the attribute each
/// pattern inspects
#[derive(Debug, Clone)]
pub struct PatternSnapshot {
    by_type: HashMap<PatternType, Vec<CompiledPattern>>,
    loaded_at: Instant,
}

/// Accepted rule decision
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub project_id: i64,
    pub score: f64,
    pub confidence: f64,
    /// e.g. "Matched app: code"
    pub reason: String,
}

/// Running total for one project while scoring
#[derive(Debug, Default)]
struct Tally {
    score: f64,
    best_contribution: f64,
    best_specificity: f64,
    best_weight: f64,
    last_used_at: Option<i64>,
    reason: String,
}

impl Tally {
    fn add(&mut self, compiled: &CompiledPattern) {
        let p = &compiled.pattern;
        let specificity = p.match_type.specificity();
        let contribution = p.weight * specificity;

        if contribution > self.best_contribution || self.reason.is_empty() {
            self.best_contribution = contribution;
            self.reason = format!("Matched {}: {}", p.pattern_type.label(), p.pattern_value);
        }
        self.score += contribution;
        self.best_specificity = self.best_specificity.max(specificity);
        self.best_weight = self.best_weight.max(p.weight);
        self.last_used_at = self.last_used_at.max(p.last_used_at);
    }

    /// Ordering where `Greater` means a stronger claim. Project id is the
    /// caller's final tie-break.
    fn rank(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.best_specificity.total_cmp(&other.best_specificity))
            .then(self.best_weight.total_cmp(&other.best_weight))
            .then(self.last_used_at.cmp(&other.last_used_at))
    }
}

impl PatternSnapshot {
    pub fn new(patterns: Vec<ProjectPattern>) -> Self {
        let mut by_type: HashMap<PatternType, Vec<CompiledPattern>> = HashMap::new();
        for compiled in patterns.into_iter().filter_map(CompiledPattern::compile) {
            by_type
                .entry(compiled.pattern.pattern_type)
                .or_default()
                .push(compiled);
        }
        Self {
            by_type,
            loaded_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() > ttl
    }

    /// Best project for `ctx`, or `None` when nothing clears the threshold
    pub fn match_context(&self, ctx: &AssignmentContext, config: &RulesConfig) -> Option<RuleMatch> {
        let mut tallies: BTreeMap<i64, Tally> = BTreeMap::new();

        for pattern_type in PatternType::ALL {
            let Some(patterns) = self.by_type.get(&pattern_type) else {
                continue;
            };

            let mut values: Vec<String> = ctx
                .attribute(pattern_type)
                .map(str::to_lowercase)
                .into_iter()
                .collect();
            // domain patterns also accept the full URL
            if pattern_type == PatternType::Domain {
                if let Some(url) = ctx.url.as_deref().filter(|u| !u.is_empty()) {
                    values.push(url.to_lowercase());
                }
            }
            if values.is_empty() {
                continue;
            }

            for compiled in patterns {
                if values.iter().any(|v| compiled.matches(v)) {
                    tallies
                        .entry(compiled.pattern.project_id)
                        .or_default()
                        .add(compiled);
                }
            }
        }

        // BTreeMap iterates by ascending id, so on a full tie the first
        // (lowest) project is kept
        let mut winner: Option<(i64, Tally)> = None;
        for (pid, tally) in tallies {
            let stronger = match &winner {
                Some((_, current)) => tally.rank(current) == Ordering::Greater,
                None => true,
            };
            if stronger {
                winner = Some((pid, tally));
            }
        }
        let (project_id, best) = winner?;

        if best.score <= config.acceptance_threshold {
            return None;
        }

        Some(RuleMatch {
            project_id,
            score: best.score,
            confidence: (best.score / config.normalizing_constant).min(1.0),
            reason: best.reason,
        })
    }

    /// Whether one pattern would fire on `ctx`, ignoring weights
    pub fn pattern_matches(pattern: &ProjectPattern, ctx: &AssignmentContext) -> bool {
        let Some(compiled) = CompiledPattern::compile(pattern.clone()) else {
            return false;
        };
        let attribute = ctx.attribute(pattern.pattern_type).map(str::to_lowercase);
        let url = (pattern.pattern_type == PatternType::Domain)
            .then(|| ctx.url.as_deref().map(str::to_lowercase))
            .flatten();
        attribute.iter().chain(url.iter()).any(|v| compiled.matches(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(
        id: i64,
        project_id: i64,
        pattern_type: PatternType,
        value: &str,
        match_type: MatchType,
        weight: f64,
    ) -> ProjectPattern {
        ProjectPattern {
            id,
            project_id,
            pattern_type,
            pattern_value: value.to_string(),
            match_type,
            weight,
            hit_count: 1,
            last_used_at: None,
            created_at: 0,
        }
    }

    fn ctx_app(app: &str) -> AssignmentContext {
        AssignmentContext {
            app_name: Some(app.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_git_repo_match() {
        let snapshot = PatternSnapshot::new(vec![pattern(
            1,
            7,
            PatternType::GitRepo,
            "github.com/x/y",
            MatchType::Exact,
            1.0,
        )]);
        let ctx = AssignmentContext {
            git_repo: Some("GitHub.com/x/y".to_string()),
            ..Default::default()
        };

        let m = snapshot.match_context(&ctx, &RulesConfig::default()).unwrap();
        assert_eq!(m.project_id, 7);
        assert!((m.confidence - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.reason, "Matched repo: github.com/x/y");
    }

    #[test]
    fn test_threshold_is_strict() {
        // 0.5 * 0.8 = 0.4 exactly: not enough
        let snapshot = PatternSnapshot::new(vec![pattern(
            1,
            1,
            PatternType::AppName,
            "co",
            MatchType::Prefix,
            0.5,
        )]);
        assert!(snapshot
            .match_context(&ctx_app("Code"), &RulesConfig::default())
            .is_none());
    }

    #[test]
    fn test_contributions_sum_per_project() {
        let snapshot = PatternSnapshot::new(vec![
            pattern(1, 1, PatternType::AppName, "code", MatchType::Exact, 0.5),
            pattern(2, 2, PatternType::AppName, "code", MatchType::Exact, 0.9),
            pattern(3, 1, PatternType::WindowTitle, "traq", MatchType::Contains, 1.0),
        ]);
        let ctx = AssignmentContext {
            app_name: Some("Code".to_string()),
            window_title: Some("main.rs - TRAQ".to_string()),
            ..Default::default()
        };

        let m = snapshot.match_context(&ctx, &RulesConfig::default()).unwrap();
        assert_eq!(m.project_id, 1);
        assert!((m.score - 1.1).abs() < 1e-9);
        assert_eq!(m.reason, "Matched window: traq");
    }

    #[test]
    fn test_ties_prefer_specificity_then_lowest_id() {
        // both score 0.6: exact@0.6 beats contains@1.0
        let snapshot = PatternSnapshot::new(vec![
            pattern(1, 1, PatternType::AppName, "cod", MatchType::Contains, 1.0),
            pattern(2, 2, PatternType::AppName, "code", MatchType::Exact, 0.6),
        ]);
        let m = snapshot
            .match_context(&ctx_app("code"), &RulesConfig::default())
            .unwrap();
        assert_eq!(m.project_id, 2);

        let snapshot = PatternSnapshot::new(vec![
            pattern(1, 9, PatternType::AppName, "code", MatchType::Exact, 1.0),
            pattern(2, 4, PatternType::AppName, "code", MatchType::Exact, 1.0),
        ]);
        for _ in 0..3 {
            let m = snapshot
                .match_context(&ctx_app("code"), &RulesConfig::default())
                .unwrap();
            assert_eq!(m.project_id, 4);
        }
    }

    #[test]
    fn test_recent_use_breaks_tie() {
        let mut recent = pattern(2, 9, PatternType::AppName, "code", MatchType::Exact, 1.0);
        recent.last_used_at = Some(500);
        let mut stale = pattern(1, 4, PatternType::AppName, "code", MatchType::Exact, 1.0);
        stale.last_used_at = Some(100);

        let snapshot = PatternSnapshot::new(vec![stale, recent]);
        let m = snapshot
            .match_context(&ctx_app("code"), &RulesConfig::default())
            .unwrap();
        assert_eq!(m.project_id, 9);
    }

    #[test]
    fn test_domain_checks_url_and_regex_ignores_case() {
        let snapshot = PatternSnapshot::new(vec![
            pattern(1, 3, PatternType::Domain, "linear.app/team", MatchType::Contains, 1.0),
            pattern(2, 5, PatternType::WindowTitle, r"^JIRA-\d+", MatchType::Regex, 2.0),
            pattern(3, 5, PatternType::WindowTitle, "([", MatchType::Regex, 2.0),
        ]);
        assert_eq!(snapshot.len(), 2);

        let ctx = AssignmentContext {
            url: Some("https://linear.app/team/issue/1".to_string()),
            domain: Some("linear.app".to_string()),
            ..Default::default()
        };
        let m = snapshot.match_context(&ctx, &RulesConfig::default()).unwrap();
        assert_eq!(m.project_id, 3);
        assert_eq!(m.reason, "Matched url: linear.app/team");

        let ctx = AssignmentContext {
            window_title: Some("jira-42 fix login".to_string()),
            ..Default::default()
        };
        let m = snapshot.match_context(&ctx, &RulesConfig::default()).unwrap();
        assert_eq!(m.project_id, 5);
        assert!((m.confidence - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot_and_expiry() {
        let snapshot = PatternSnapshot::new(vec![]);
        assert!(snapshot.is_empty());
        assert!(snapshot
            .match_context(&ctx_app("code"), &RulesConfig::default())
            .is_none());
        assert!(!snapshot.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_single_pattern_check() {
        let p = pattern(1, 1, PatternType::Path, "/src/traq", MatchType::Prefix, 1.0);
        let ctx = AssignmentContext {
            file_path: Some("/SRC/traq/main.rs".to_string()),
            ..Default::default()
        };
        assert!(PatternSnapshot::pattern_matches(&p, &ctx));
        assert!(!PatternSnapshot::pattern_matches(&p, &ctx_app("code")));
    }
}
