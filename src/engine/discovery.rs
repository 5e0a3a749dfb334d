//! Project discovery from recent history
//!
//! Repositories that received commits and apps that keep coming back are
//! turned into inferred (`is_manual = false`) projects, each seeded with the
//! pattern that found it. Names already in use, ignoring case, are skipped,
//! so running discovery again only picks up what is new.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::context::{is_browser, is_generic_app, repo_name, LearnedPattern};
use super::AssignmentEngine;
use crate::model::{MatchType, NewProject, PatternType, Project};

const DISCOVERY_COLORS: &[&str] = &[
    "#6366f1", "#8b5cf6", "#ec4899", "#f43f5e", "#f97316", "#eab308", "#22c55e", "#14b8a6",
    "#06b6d4", "#3b82f6",
];

const DISCOVERED_DESCRIPTION: &str = "Discovered from activity history";

struct Discovered {
    name: String,
    seed: LearnedPattern,
}

impl AssignmentEngine {
    /// Create inferred projects from repositories and recurring apps seen at
    /// or after `since`. Returns only the projects created by this call.
    pub fn discover_projects(&self, since: i64) -> Result<Vec<Project>> {
        let existing = self.store.list_projects()?;
        let mut taken: HashSet<String> = existing.iter().map(|p| p.name.to_lowercase()).collect();

        let mut found = vec![];
        for repo in self.store.recent_repositories(since)? {
            if let Some(name) = repo_name(&repo) {
                found.push(Discovered {
                    seed: LearnedPattern {
                        pattern_type: PatternType::GitRepo,
                        value: name.clone(),
                        match_type: MatchType::Contains,
                        initial_weight: 1.0,
                    },
                    name,
                });
            }
        }

        let min_events = self.config.discovery.min_app_events;
        for (app, count) in self.store.recurring_apps(since, min_events)? {
            if is_generic_app(&app) || is_browser(&app) {
                debug!(app = %app, count, "Not a project candidate");
                continue;
            }
            found.push(Discovered {
                seed: LearnedPattern {
                    pattern_type: PatternType::AppName,
                    value: app.to_lowercase(),
                    match_type: MatchType::Exact,
                    initial_weight: 0.5,
                },
                name: app,
            });
        }

        let tx = self.store.transaction()?;
        let mut created = vec![];
        for candidate in found {
            if !taken.insert(candidate.name.to_lowercase()) {
                continue;
            }

            let color = DISCOVERY_COLORS[(existing.len() + created.len()) % DISCOVERY_COLORS.len()];
            let project = self.store.create_project(&NewProject {
                name: candidate.name,
                color: Some(color.to_string()),
                description: Some(DISCOVERED_DESCRIPTION.to_string()),
                is_manual: false,
            })?;

            let seed = &candidate.seed;
            self.store.upsert_pattern(
                project.id,
                seed.pattern_type,
                &seed.value,
                seed.match_type,
                seed.initial_weight,
            )?;
            created.push(project);
        }
        tx.commit().context("Failed to commit discovered projects")?;

        if !created.is_empty() {
            self.invalidate_patterns();
            info!(count = created.len(), "Discovered projects");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::ProjectSource;
    use crate::store::{ActivityStore, NewFocusEvent, NewGitCommit};

    fn engine() -> AssignmentEngine {
        AssignmentEngine::new(ActivityStore::open_in_memory().unwrap(), Config::default())
    }

    fn focus_n(engine: &AssignmentEngine, app: &str, n: i64) {
        for ts in 0..n {
            engine
                .store()
                .insert_focus_event(&NewFocusEvent::new(1_000 + ts, app, "window"))
                .unwrap();
        }
    }

    #[test]
    fn test_discovers_repos_and_recurring_apps() {
        let engine = engine();
        engine.create_project(&NewProject::manual("Billing")).unwrap();

        let mut remote = NewGitCommit::new(1_000, "aaa", "/src/Traq");
        remote.remote_url = Some("git@github.com:me/traq.git".to_string());
        engine.store().insert_git_commit(&remote).unwrap();
        engine
            .store()
            .insert_git_commit(&NewGitCommit::new(1_001, "bbb", "/home/me/traq"))
            .unwrap();
        engine
            .store()
            .insert_git_commit(&NewGitCommit::new(1_002, "ccc", "/src/billing"))
            .unwrap();
        // too old to count
        engine
            .store()
            .insert_git_commit(&NewGitCommit::new(10, "ddd", "/src/legacy"))
            .unwrap();

        focus_n(&engine, "Figma", 3);
        focus_n(&engine, "Finder", 5);
        focus_n(&engine, "Google Chrome", 4);
        focus_n(&engine, "Slack", 1);

        let created = engine.discover_projects(500).unwrap();
        let names: Vec<_> = created.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["traq", "Figma"]);
        assert!(created.iter().all(|p| !p.is_manual));

        let figma = &created[1];
        let patterns = engine.list_patterns(figma.id).unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type, PatternType::AppName);

        // the seeded pattern routes new activity straight away
        let (_, assignment) = engine
            .record_focus_event(&NewFocusEvent::new(2_000, "Figma", "mockups"))
            .unwrap();
        assert_eq!(assignment.project_id, Some(figma.id));
        assert_eq!(assignment.source, ProjectSource::Rule);

        assert!(engine.discover_projects(500).unwrap().is_empty());
    }

    #[test]
    fn test_discovery_skips_names_in_any_case() {
        let engine = engine();
        engine.create_project(&NewProject::manual("FIGMA")).unwrap();
        focus_n(&engine, "Figma", 3);
        focus_n(&engine, "figma", 3);

        assert!(engine.discover_projects(0).unwrap().is_empty());
        assert_eq!(engine.list_projects().unwrap().len(), 1);
    }
}
