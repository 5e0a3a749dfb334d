//! Typed errors raised at the engine boundary
//!
//! Storage and plumbing failures travel as `anyhow::Error`; the variants here
//! are the ones a caller is expected to inspect with `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown pattern type: {0}")]
    UnknownPatternType(String),

    #[error("unknown match type: {0}")]
    UnknownMatchType(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("unknown assignment source: {0}")]
    UnknownSource(String),

    #[error("invalid regex pattern {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern value must not be empty")]
    EmptyPatternValue,

    #[error("weight must be a finite number, got {0}")]
    InvalidWeight(f64),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("a project named '{0}' already exists")]
    DuplicateProjectName(String),
}
