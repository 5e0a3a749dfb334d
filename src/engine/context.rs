//! Context extraction and pattern learning heuristics
//!
//! Turns a stored event into the attribute bag the matchers score, renders
//! the text an embedding is computed from, and decides which patterns a user
//! pin should teach.

use std::path::Path;

use crate::model::{AssignmentContext, MatchType, PatternType};
use crate::store::EventRecord;

const BROWSERS: &[&str] = &[
    "chrome", "firefox", "safari", "brave", "edge", "chromium", "opera", "vivaldi",
];

const GENERIC_APPS: &[&str] = &["gnome-shell", "plasmashell", "explorer", "finder", "desktop"];

const GENERIC_DOMAINS: &[&str] = &[
    "google.com",
    "github.com",
    "stackoverflow.com",
    "youtube.com",
    "twitter.com",
    "facebook.com",
    "linkedin.com",
    "reddit.com",
    "amazon.com",
    "wikipedia.org",
];

const NOISE_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "new", "tab", "untitled", "file", "edit", "view",
    "help", "window", "document", "google", "chrome", "firefox", "safari",
];

const MAX_TITLE_KEYWORDS: usize = 3;
const MAX_TITLE_CHARS: usize = 200;

/// A pattern proposed by a user pin, upserted at `initial_weight`
#[derive(Debug, Clone, PartialEq)]
pub struct LearnedPattern {
    pub pattern_type: PatternType,
    pub value: String,
    pub match_type: MatchType,
    pub initial_weight: f64,
}

impl LearnedPattern {
    fn new(pattern_type: PatternType, value: String, match_type: MatchType, initial_weight: f64) -> Self {
        Self {
            pattern_type,
            value,
            match_type,
            initial_weight,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Attributes the matchers see for one event
pub fn extract_context(record: &EventRecord) -> AssignmentContext {
    let mut ctx = AssignmentContext {
        app_name: non_empty(&record.app_name),
        window_title: non_empty(&record.window_title),
        file_path: non_empty(&record.file_path),
        git_repo: non_empty(&record.remote_url).or_else(|| non_empty(&record.repo_path)),
        branch_name: non_empty(&record.branch),
        ..Default::default()
    };

    if ctx.app_name.as_deref().is_some_and(is_browser) {
        if let Some(url) = ctx.window_title.as_deref().and_then(extract_url) {
            ctx.domain = extract_domain(&url);
            ctx.url = Some(url);
        }
    }

    ctx
}

/// Canonical text an embedding is computed from. Equal contexts always
/// render to equal text, so its hash detects staleness.
pub fn build_context_text(ctx: &AssignmentContext) -> String {
    let mut parts = vec![];

    if let Some(app) = ctx.attribute(PatternType::AppName) {
        parts.push(format!("app:{}", app.to_lowercase()));
    }
    if let Some(title) = ctx.attribute(PatternType::WindowTitle) {
        let title: String = title.to_lowercase().chars().take(MAX_TITLE_CHARS).collect();
        parts.push(format!("title:{}", title));
    }
    if let Some(repo) = ctx.attribute(PatternType::GitRepo) {
        parts.push(format!("repo:{}", repo.to_lowercase()));
    }
    if let Some(branch) = ctx.branch_name.as_deref().filter(|b| !b.is_empty()) {
        parts.push(format!("branch:{}", branch.to_lowercase()));
    }
    if let Some(domain) = ctx.attribute(PatternType::Domain) {
        parts.push(format!("domain:{}", domain.to_lowercase()));
    }
    if let Some(path) = ctx.attribute(PatternType::Path) {
        parts.push(format!("file:{}", path.to_lowercase()));
    }

    parts.join(" ")
}

/// Patterns a pin on `ctx` should create or reinforce
pub fn learned_patterns(ctx: &AssignmentContext) -> Vec<LearnedPattern> {
    let mut learned = vec![];

    if let Some(app) = ctx.attribute(PatternType::AppName) {
        if !is_generic_app(app) {
            learned.push(LearnedPattern::new(
                PatternType::AppName,
                app.to_lowercase(),
                MatchType::Exact,
                0.5,
            ));
        }
    }

    if let Some(name) = ctx.attribute(PatternType::GitRepo).and_then(repo_name) {
        learned.push(LearnedPattern::new(PatternType::GitRepo, name, MatchType::Contains, 1.0));
    }

    if let Some(title) = ctx.attribute(PatternType::WindowTitle) {
        for keyword in title_keywords(title) {
            learned.push(LearnedPattern::new(
                PatternType::WindowTitle,
                keyword,
                MatchType::Contains,
                0.3,
            ));
        }
    }

    if let Some(domain) = ctx.attribute(PatternType::Domain) {
        if !is_generic_domain(domain) {
            learned.push(LearnedPattern::new(
                PatternType::Domain,
                domain.to_lowercase(),
                MatchType::Contains,
                0.7,
            ));
        }
    }

    if let Some(dir) = ctx.attribute(PatternType::Path).and_then(parent_dir) {
        learned.push(LearnedPattern::new(PatternType::Path, dir, MatchType::Prefix, 0.6));
    }

    learned
}

// ============================================
// HEURISTICS
// ============================================

pub fn is_browser(app_name: &str) -> bool {
    let lower = app_name.to_lowercase();
    BROWSERS.iter().any(|b| lower.contains(b))
}

/// Shells and file managers show up under every project
pub fn is_generic_app(app_name: &str) -> bool {
    let lower = app_name.to_lowercase();
    GENERIC_APPS.iter().any(|g| lower.contains(g))
}

fn is_generic_domain(domain: &str) -> bool {
    let lower = domain.to_lowercase();
    GENERIC_DOMAINS
        .iter()
        .any(|g| lower == *g || lower.ends_with(&format!(".{}", g)))
}

/// First `http(s)://` token in a window title
fn extract_url(title: &str) -> Option<String> {
    let start = match (title.find("https://"), title.find("http://")) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => a.or(b)?,
    };
    let url: String = title[start..]
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    Some(url)
}

/// Lowercased host of a URL, without scheme or port
fn extract_domain(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let host = rest.split('/').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    (!host.is_empty()).then(|| host.to_lowercase())
}

/// `https://github.com/user/repo.git`, `git@github.com:user/repo.git` and
/// `/path/to/repo` all yield `repo`
pub fn repo_name(repo: &str) -> Option<String> {
    let trimmed = repo.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let name = last.rsplit(':').next().unwrap_or(last);
    (!name.is_empty()).then(|| name.to_lowercase())
}

/// Up to three distinctive words from a window title
fn title_keywords(title: &str) -> Vec<String> {
    const TRIM: &[char] = &['[', ']', '(', ')', '-', ':', '.', ',', '|', '/', '\\', '"', '\''];

    title
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(TRIM))
        .filter(|w| w.len() >= 4 && !NOISE_WORDS.contains(w))
        .filter(|w| !["com", "org"].iter().any(|tld| w.contains(&format!(".{}", tld))))
        .filter(|w| !w.contains("http") && !w.contains("www"))
        .take(MAX_TITLE_KEYWORDS)
        .map(str::to_string)
        .collect()
}

fn parent_dir(path: &str) -> Option<String> {
    let parent = Path::new(path).parent()?.to_string_lossy().to_string();
    (!parent.is_empty() && parent != "/").then_some(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Assignment, EventRef};

    fn focus(app: &str, title: &str) -> EventRecord {
        EventRecord {
            event: EventRef::focus(1),
            timestamp: 0,
            assignment: Assignment::unassigned(),
            corrected_from: None,
            app_name: Some(app.to_string()),
            window_title: Some(title.to_string()),
            file_path: None,
            repo_path: None,
            remote_url: None,
            branch: None,
        }
    }

    #[test]
    fn test_browser_title_yields_domain() {
        let ctx = extract_context(&focus(
            "Google Chrome",
            "Pull request https://Gitlab.Example.io:8443/team/app/-/merge_requests/4 - Chrome",
        ));
        assert_eq!(
            ctx.url.as_deref(),
            Some("https://Gitlab.Example.io:8443/team/app/-/merge_requests/4")
        );
        assert_eq!(ctx.domain.as_deref(), Some("gitlab.example.io"));

        let ctx = extract_context(&focus("Code", "see https://example.com"));
        assert_eq!(ctx.url, None);
        assert_eq!(ctx.domain, None);
    }

    #[test]
    fn test_git_prefers_remote_url() {
        let mut record = focus("", "");
        record.event = EventRef::git(1);
        record.app_name = None;
        record.window_title = None;
        record.repo_path = Some("/home/me/src/traq".to_string());
        record.branch = Some("main".to_string());

        let ctx = extract_context(&record);
        assert_eq!(ctx.git_repo.as_deref(), Some("/home/me/src/traq"));
        assert_eq!(ctx.branch_name.as_deref(), Some("main"));

        record.remote_url = Some("git@github.com:me/traq.git".to_string());
        let ctx = extract_context(&record);
        assert_eq!(ctx.git_repo.as_deref(), Some("git@github.com:me/traq.git"));
        assert_eq!(build_context_text(&ctx), "repo:git@github.com:me/traq.git branch:main");
    }

    #[test]
    fn test_context_text_is_canonical() {
        let ctx = AssignmentContext {
            app_name: Some("Code".to_string()),
            window_title: Some("Main.RS - Traq".to_string()),
            file_path: Some("/Src/Main.rs".to_string()),
            ..Default::default()
        };
        assert_eq!(
            build_context_text(&ctx),
            "app:code title:main.rs - traq file:/src/main.rs"
        );

        let long = AssignmentContext {
            window_title: Some("é".repeat(300)),
            ..Default::default()
        };
        assert_eq!(build_context_text(&long).chars().count(), "title:".len() + 200);
        assert_eq!(build_context_text(&AssignmentContext::default()), "");
    }

    #[test]
    fn test_repo_name_formats() {
        assert_eq!(repo_name("https://github.com/user/Repo.git").as_deref(), Some("repo"));
        assert_eq!(repo_name("git@github.com:user/repo.git").as_deref(), Some("repo"));
        assert_eq!(repo_name("git@host:repo").as_deref(), Some("repo"));
        assert_eq!(repo_name("/path/to/repo/").as_deref(), Some("repo"));
        assert_eq!(repo_name(""), None);
    }

    #[test]
    fn test_title_keywords_drop_noise() {
        assert_eq!(
            title_keywords("New Tab - (Traq) dashboard: www.traq.com quarterly report"),
            vec!["traq", "dashboard", "quarterly"]
        );
        assert!(title_keywords("the and for").is_empty());
    }

    #[test]
    fn test_learned_patterns() {
        let ctx = AssignmentContext {
            app_name: Some("Code".to_string()),
            window_title: Some("foo.go — myrepo".to_string()),
            git_repo: Some("https://github.com/me/MyRepo.git".to_string()),
            domain: Some("docs.github.com".to_string()),
            file_path: Some("/src/myrepo/foo.go".to_string()),
            ..Default::default()
        };

        let learned = learned_patterns(&ctx);
        let summary: Vec<_> = learned
            .iter()
            .map(|p| (p.pattern_type, p.value.as_str(), p.match_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                (PatternType::AppName, "code", MatchType::Exact),
                (PatternType::GitRepo, "myrepo", MatchType::Contains),
                (PatternType::WindowTitle, "foo.go", MatchType::Contains),
                (PatternType::WindowTitle, "myrepo", MatchType::Contains),
                (PatternType::Path, "/src/myrepo", MatchType::Prefix),
            ]
        );
        assert_eq!(learned[0].initial_weight, 0.5);
    }

    #[test]
    fn test_generic_sources_teach_nothing() {
        let ctx = AssignmentContext {
            app_name: Some("Finder".to_string()),
            domain: Some("google.com".to_string()),
            file_path: Some("/top".to_string()),
            ..Default::default()
        };
        assert!(learned_patterns(&ctx).is_empty());

        let ctx = AssignmentContext {
            domain: Some("linear.app".to_string()),
            ..Default::default()
        };
        assert_eq!(learned_patterns(&ctx)[0].value, "linear.app");
    }
}
