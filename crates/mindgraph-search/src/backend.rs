//! Search backend trait

use mindgraph_core::{SearchHit, SearchResult};
use serde::Serialize;

/// Result type for backend calls
pub type SearchOutcome<T> = Result<T, SearchError>;

/// Backend error types. The chain absorbs all of them.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// What a backend reports about itself before it is called.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendHealth {
    Healthy,
    Degraded,
    Unavailable,
}

/// One sub-query as handed to a backend.
#[derive(Clone, Debug)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    /// Results of the node's parents, in edge order.
    pub context: Vec<SearchResult>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: 5,
            context: Vec::new(),
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_context(mut self, context: Vec<SearchResult>) -> Self {
        self.context = context;
        self
    }
}

/// A source of search hits.
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    /// Stable identifier, also used as the hits' `source_backend` tag.
    fn name(&self) -> &str;

    async fn search(&self, request: &SearchRequest) -> SearchOutcome<Vec<SearchHit>>;

    fn health(&self) -> BackendHealth {
        BackendHealth::Healthy
    }
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
