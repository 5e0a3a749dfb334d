//! SQLite schema definition
//!
//! Event tables are owned by the capture collaborators; the engine only reads
//! their context columns and writes the assignment columns. Learned artifacts
//! (patterns, examples) belong to their project and cascade with it, events
//! never do.

pub const SCHEMA: &str = r#"
-- ============================================
-- PROJECTS
-- ============================================

CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    color TEXT NOT NULL DEFAULT '#6366f1',
    description TEXT NOT NULL DEFAULT '',
    is_manual BOOLEAN NOT NULL DEFAULT TRUE,  -- FALSE = auto-discovered
    created_at INTEGER NOT NULL,
    updated_at INTEGER
);

-- Weighted matching rules, reinforced on every user confirmation
CREATE TABLE IF NOT EXISTS project_patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    pattern_type TEXT NOT NULL
        CHECK (pattern_type IN ('app_name', 'window_title', 'git_repo', 'domain', 'path')),
    pattern_value TEXT NOT NULL,
    match_type TEXT NOT NULL
        CHECK (match_type IN ('exact', 'contains', 'prefix', 'suffix', 'regex')),
    weight REAL NOT NULL DEFAULT 1.0 CHECK (weight >= 0.1 AND weight <= 2.0),
    hit_count INTEGER NOT NULL DEFAULT 1 CHECK (hit_count >= 1),
    last_used_at INTEGER,
    created_at INTEGER NOT NULL,
    UNIQUE(project_id, pattern_type, pattern_value, match_type),
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
);

-- Append-only log of user-confirmed contexts (few-shot bias)
CREATE TABLE IF NOT EXISTS assignment_examples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    event_type TEXT NOT NULL CHECK (event_type IN ('focus', 'screenshot', 'git')),
    event_id INTEGER NOT NULL,
    context_json TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
);

-- ============================================
-- EMBEDDINGS
-- ============================================

-- One vector per event; context_hash gates re-embedding
CREATE TABLE IF NOT EXISTS activity_embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL CHECK (event_type IN ('focus', 'screenshot', 'git')),
    event_id INTEGER NOT NULL,
    embedding BLOB NOT NULL,               -- little-endian f32 values
    context_text TEXT NOT NULL,
    context_hash TEXT NOT NULL,            -- sha256 hex of context_text
    created_at INTEGER NOT NULL,
    UNIQUE(event_type, event_id)
);

-- ============================================
-- EVENTS (written by capture collaborators)
-- ============================================

-- project_id is nullified explicitly on project deletion, never cascaded
CREATE TABLE IF NOT EXISTS window_focus_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,            -- focus start
    end_time INTEGER NOT NULL,
    duration_seconds REAL NOT NULL DEFAULT 0,
    app_name TEXT NOT NULL,
    window_title TEXT NOT NULL,
    file_path TEXT,
    project_id INTEGER,
    project_confidence REAL NOT NULL DEFAULT 0,
    project_source TEXT NOT NULL DEFAULT 'unassigned'
        CHECK (project_source IN ('unassigned', 'user', 'rule', 'ai')),
    corrected_from TEXT CHECK (corrected_from IN ('rule', 'ai')),
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS screenshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    filepath TEXT NOT NULL,
    app_name TEXT,
    window_title TEXT,
    project_id INTEGER,
    project_confidence REAL NOT NULL DEFAULT 0,
    project_source TEXT NOT NULL DEFAULT 'unassigned'
        CHECK (project_source IN ('unassigned', 'user', 'rule', 'ai')),
    corrected_from TEXT CHECK (corrected_from IN ('rule', 'ai')),
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS git_commits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    commit_hash TEXT NOT NULL,
    repo_path TEXT NOT NULL,
    remote_url TEXT,
    branch TEXT,
    message_subject TEXT NOT NULL DEFAULT '',
    project_id INTEGER,
    project_confidence REAL NOT NULL DEFAULT 0,
    project_source TEXT NOT NULL DEFAULT 'unassigned'
        CHECK (project_source IN ('unassigned', 'user', 'rule', 'ai')),
    corrected_from TEXT CHECK (corrected_from IN ('rule', 'ai')),
    created_at INTEGER NOT NULL,
    UNIQUE(commit_hash, repo_path)
);

-- ============================================
-- SWEEP STATE
-- ============================================

CREATE TABLE IF NOT EXISTS sweep_state (
    name TEXT PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    event_id INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_patterns_project ON project_patterns(project_id);
CREATE INDEX IF NOT EXISTS idx_patterns_type ON project_patterns(pattern_type);
CREATE INDEX IF NOT EXISTS idx_examples_project ON assignment_examples(project_id);
CREATE INDEX IF NOT EXISTS idx_examples_created ON assignment_examples(created_at DESC);

CREATE INDEX IF NOT EXISTS idx_focus_timestamp ON window_focus_events(timestamp);
CREATE INDEX IF NOT EXISTS idx_focus_project ON window_focus_events(project_id);
CREATE INDEX IF NOT EXISTS idx_focus_source ON window_focus_events(project_source);

CREATE INDEX IF NOT EXISTS idx_screenshots_timestamp ON screenshots(timestamp);
CREATE INDEX IF NOT EXISTS idx_screenshots_project ON screenshots(project_id);
CREATE INDEX IF NOT EXISTS idx_screenshots_source ON screenshots(project_source);

CREATE INDEX IF NOT EXISTS idx_git_timestamp ON git_commits(timestamp);
CREATE INDEX IF NOT EXISTS idx_git_project ON git_commits(project_id);
CREATE INDEX IF NOT EXISTS idx_git_source ON git_commits(project_source);
"#;
