//! Domain types shared by the store and the engine
//!
//! Every category that is persisted as text (`pattern_type`, `match_type`,
//! `project_source`, `event_type`) is a closed enum here. Parsing happens at
//! the boundary, so an unknown string never reaches the database.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Persist a text-backed enum through its `as_str`/`FromStr` pair.
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: EngineError| FromSqlError::Other(Box::new(e)))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }
    };
}

// ============================================
// EVENTS
// ============================================

/// Kinds of captured events that carry assignment fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Focus,
    Screenshot,
    Git,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Focus, EventType::Screenshot, EventType::Git];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Focus => "focus",
            EventType::Screenshot => "screenshot",
            EventType::Git => "git",
        }
    }

    /// Backing table for this event kind
    pub fn table(&self) -> &'static str {
        match self {
            EventType::Focus => "window_focus_events",
            EventType::Screenshot => "screenshots",
            EventType::Git => "git_commits",
        }
    }
}

impl FromStr for EventType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // "activity" is what the dashboard calls focus events
            "focus" | "activity" => Ok(EventType::Focus),
            "screenshot" => Ok(EventType::Screenshot),
            "git" => Ok(EventType::Git),
            other => Err(EngineError::UnknownEventType(other.to_string())),
        }
    }
}

sql_text_enum!(EventType);

/// A pointer to one assignable event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventRef {
    pub event_type: EventType,
    pub event_id: i64,
}

impl EventRef {
    pub fn new(event_type: EventType, event_id: i64) -> Self {
        Self {
            event_type,
            event_id,
        }
    }

    pub fn focus(event_id: i64) -> Self {
        Self::new(EventType::Focus, event_id)
    }

    pub fn screenshot(event_id: i64) -> Self {
        Self::new(EventType::Screenshot, event_id)
    }

    pub fn git(event_id: i64) -> Self {
        Self::new(EventType::Git, event_id)
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.event_type, self.event_id)
    }
}

/// Parses the `focus:12` form produced by `Display`
impl FromStr for EventRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| EngineError::UnknownEventType(s.to_string()))?;
        let event_id = id
            .trim()
            .parse()
            .map_err(|_| EngineError::UnknownEventType(s.to_string()))?;
        Ok(EventRef::new(kind.trim().parse()?, event_id))
    }
}

// ============================================
// ASSIGNMENT
// ============================================

/// Which mechanism produced an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectSource {
    Unassigned,
    User,
    Rule,
    Ai,
}

impl ProjectSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectSource::Unassigned => "unassigned",
            ProjectSource::User => "user",
            ProjectSource::Rule => "rule",
            ProjectSource::Ai => "ai",
        }
    }

    /// Rule and AI assignments are produced by scoring, not by a person
    pub fn is_automatic(&self) -> bool {
        matches!(self, ProjectSource::Rule | ProjectSource::Ai)
    }
}

impl FromStr for ProjectSource {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(ProjectSource::Unassigned),
            "user" => Ok(ProjectSource::User),
            "rule" => Ok(ProjectSource::Rule),
            // older databases labelled similarity results "embedding"
            "ai" | "embedding" => Ok(ProjectSource::Ai),
            other => Err(EngineError::UnknownSource(other.to_string())),
        }
    }
}

sql_text_enum!(ProjectSource);

/// The `(projectId, confidence, source)` triple written onto an event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub project_id: Option<i64>,
    pub confidence: f64,
    pub source: ProjectSource,
}

impl Assignment {
    pub fn unassigned() -> Self {
        Self {
            project_id: None,
            confidence: 0.0,
            source: ProjectSource::Unassigned,
        }
    }

    pub fn user(project_id: i64) -> Self {
        Self {
            project_id: Some(project_id),
            confidence: 1.0,
            source: ProjectSource::User,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.source == ProjectSource::User
    }
}

/// Context attributes extracted from an event, also the shape of an
/// example's `context_json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl AssignmentContext {
    /// The attribute a pattern of `pattern_type` is tested against
    pub fn attribute(&self, pattern_type: PatternType) -> Option<&str> {
        let value = match pattern_type {
            PatternType::AppName => self.app_name.as_deref(),
            PatternType::WindowTitle => self.window_title.as_deref(),
            PatternType::GitRepo => self.git_repo.as_deref(),
            PatternType::Domain => self.domain.as_deref(),
            PatternType::Path => self.file_path.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        PatternType::ALL.iter().all(|t| self.attribute(*t).is_none())
            && self.url.as_deref().map_or(true, str::is_empty)
    }
}

// ============================================
// PATTERNS
// ============================================

/// Which context attribute a pattern inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    AppName,
    WindowTitle,
    GitRepo,
    Domain,
    Path,
}

impl PatternType {
    pub const ALL: [PatternType; 5] = [
        PatternType::AppName,
        PatternType::WindowTitle,
        PatternType::GitRepo,
        PatternType::Domain,
        PatternType::Path,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::AppName => "app_name",
            PatternType::WindowTitle => "window_title",
            PatternType::GitRepo => "git_repo",
            PatternType::Domain => "domain",
            PatternType::Path => "path",
        }
    }

    /// Short label used in match explanations
    pub fn label(&self) -> &'static str {
        match self {
            PatternType::AppName => "app",
            PatternType::WindowTitle => "window",
            PatternType::GitRepo => "repo",
            PatternType::Domain => "url",
            PatternType::Path => "path",
        }
    }
}

impl FromStr for PatternType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app_name" => Ok(PatternType::AppName),
            "window_title" => Ok(PatternType::WindowTitle),
            "git_repo" => Ok(PatternType::GitRepo),
            "domain" => Ok(PatternType::Domain),
            "path" => Ok(PatternType::Path),
            other => Err(EngineError::UnknownPatternType(other.to_string())),
        }
    }
}

sql_text_enum!(PatternType);

/// How a pattern value is compared against an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Contains,
    Prefix,
    Suffix,
    Regex,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Contains => "contains",
            MatchType::Prefix => "prefix",
            MatchType::Suffix => "suffix",
            MatchType::Regex => "regex",
        }
    }

    /// Multiplier applied to a pattern's weight when it matches.
    /// exact > prefix = suffix > contains > regex
    pub fn specificity(&self) -> f64 {
        match self {
            MatchType::Exact => 1.0,
            MatchType::Prefix | MatchType::Suffix => 0.8,
            MatchType::Contains => 0.6,
            MatchType::Regex => 0.5,
        }
    }
}

impl FromStr for MatchType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchType::Exact),
            "contains" => Ok(MatchType::Contains),
            "prefix" => Ok(MatchType::Prefix),
            "suffix" => Ok(MatchType::Suffix),
            "regex" => Ok(MatchType::Regex),
            other => Err(EngineError::UnknownMatchType(other.to_string())),
        }
    }
}

sql_text_enum!(MatchType);

pub const MIN_PATTERN_WEIGHT: f64 = 0.1;
pub const MAX_PATTERN_WEIGHT: f64 = 2.0;

/// Clamp a weight into the range every stored pattern must respect
pub fn clamp_weight(weight: f64) -> f64 {
    weight.clamp(MIN_PATTERN_WEIGHT, MAX_PATTERN_WEIGHT)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPattern {
    pub id: i64,
    pub project_id: i64,
    pub pattern_type: PatternType,
    pub pattern_value: String,
    pub match_type: MatchType,
    pub weight: f64,
    pub hit_count: i64,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

/// Operator-supplied rule; unset fields fall back to defaults on create and
/// to the existing values on update
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInput {
    pub project_id: Option<i64>,
    pub pattern_type: Option<PatternType>,
    pub pattern_value: Option<String>,
    pub match_type: Option<MatchType>,
    pub weight: Option<f64>,
}

// ============================================
// PROJECTS
// ============================================

pub const DEFAULT_PROJECT_COLOR: &str = "#6366f1";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub description: String,
    pub is_manual: bool,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub is_manual: bool,
}

impl NewProject {
    /// A user-created project
    pub fn manual(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_manual: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub screenshot_count: i64,
    pub focus_event_count: i64,
    pub git_commit_count: i64,
    pub total_minutes: f64,
    pub pattern_count: i64,
}

// ============================================
// LEARNING ARTIFACTS
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentExample {
    pub id: i64,
    pub project_id: i64,
    pub event_type: EventType,
    pub event_id: i64,
    pub context_json: String,
    pub created_at: i64,
}

impl AssignmentExample {
    pub fn event(&self) -> EventRef {
        EventRef::new(self.event_type, self.event_id)
    }

    /// Parsed context, `None` when the stored JSON is malformed
    pub fn context(&self) -> Option<AssignmentContext> {
        serde_json::from_str(&self.context_json).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEmbedding {
    pub id: i64,
    pub event: EventRef,
    pub embedding: Vec<f32>,
    pub context_text: String,
    pub context_hash: String,
    pub created_at: i64,
}

// ============================================
// METRICS
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentMetrics {
    pub period_start: i64,
    pub period_end: i64,
    pub total_activities: i64,
    pub auto_assigned: i64,
    pub rule_assigned: i64,
    pub ai_assigned: i64,
    pub user_assigned: i64,
    pub corrections: i64,
    pub accuracy_rate: f64,
}
