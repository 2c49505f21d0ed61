//! Error types for mindgraph
//!
//! The domain variants mirror the ways a run can degrade. None of them escape
//! the scheduler: they are turned into events, history entries and log lines.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("conflicting redefinition of node {id}: {existing:?} vs {requested:?}")]
    ConflictingRedefinition {
        id: String,
        existing: String,
        requested: String,
    },

    #[error("loop detected at node {id} after {visit_count} visits")]
    LoopDetected { id: String, visit_count: u32 },

    #[error("execution timed out after {elapsed_ms}ms")]
    ExecutionTimeout { elapsed_ms: u64 },

    #[error("no search backend available for query {0:?}")]
    BackendUnavailable(String),

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand(reason.into())
    }

    pub fn conflicting(
        id: impl Into<String>,
        existing: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::ConflictingRedefinition {
            id: id.into(),
            existing: existing.into(),
            requested: requested.into(),
        }
    }

    /// Short machine-readable tag, used as the `reason` of rejection events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCommand(_) => "invalid_command",
            Self::ConflictingRedefinition { .. } => "conflicting_redefinition",
            Self::LoopDetected { .. } => "loop_detected",
            Self::ExecutionTimeout { .. } => "execution_timeout",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::MalformedSnapshot(_) => "malformed_snapshot",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Yaml(_) => "yaml",
        }
    }
}
