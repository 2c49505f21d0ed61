//! Core types for mindgraph: nodes, search hits, and the canonical snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node kind. A run normally has one ROOT and any number of SEARCH nodes.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Root,
    #[default]
    Search,
}

impl NodeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ROOT" => Some(Self::Root),
            "SEARCH" => Some(Self::Search),
            _ => None,
        }
    }
}

/// Per-node execution status.
///
/// `WAITING → SEARCHING → {SUCCESS | FAIL}`, and the loop governor may force
/// `TERMINATED_LOOP` from `WAITING` or `SEARCHING`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    #[default]
    Waiting,
    Searching,
    Success,
    Fail,
    TerminatedLoop,
}

impl NodeStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(Self::Waiting),
            "SEARCHING" => Some(Self::Searching),
            "SUCCESS" => Some(Self::Success),
            "FAIL" => Some(Self::Fail),
            "TERMINATED_LOOP" => Some(Self::TerminatedLoop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Searching => "SEARCHING",
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
            Self::TerminatedLoop => "TERMINATED_LOOP",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Fail | Self::TerminatedLoop)
    }

    /// Whether the state machine permits `self → next`.
    pub fn can_transition_to(&self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Waiting, Searching)
                | (Waiting, TerminatedLoop)
                | (Searching, Success)
                | (Searching, Fail)
                | (Searching, TerminatedLoop)
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a result was fabricated instead of coming from a backend.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FallbackReason {
    #[serde(rename = "loop-fallback")]
    Loop,
    #[serde(rename = "timeout-fallback")]
    Timeout,
    #[serde(rename = "error-fallback")]
    Error,
    #[serde(rename = "interrupted-fallback")]
    Interrupted,
    #[serde(rename = "repair-fallback")]
    Repair,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loop => "loop-fallback",
            Self::Timeout => "timeout-fallback",
            Self::Error => "error-fallback",
            Self::Interrupted => "interrupted-fallback",
            Self::Repair => "repair-fallback",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single search hit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Backend tag; `"synthetic"` for fabricated hits.
    pub source_backend: String,
    pub fetched_at: DateTime<Utc>,
}

impl SearchHit {
    pub fn is_synthetic(&self) -> bool {
        self.source_backend == SYNTHETIC_SOURCE
    }
}

/// `source_backend` tag carried by hits from the synthetic backend.
pub const SYNTHETIC_SOURCE: &str = "synthetic";

/// Hits for one query. Empty only transiently or when `fallback` is set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
}

impl SearchResult {
    pub fn new(query: impl Into<String>, hits: Vec<SearchHit>) -> Self {
        Self {
            query: query.into(),
            hits,
            fallback: None,
        }
    }

    /// Empty result tagged with the reason it was fabricated.
    pub fn fallback(query: impl Into<String>, reason: FallbackReason) -> Self {
        Self {
            query: query.into(),
            hits: Vec::new(),
            fallback: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// A unit of search work.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub query: String,
    pub status: NodeStatus,
    pub result: Option<SearchResult>,
    pub visit_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            query: query.into(),
            status: NodeStatus::Waiting,
            result: None,
            visit_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Outcome of one planner command, as recorded in the history log.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOutcome {
    Applied,
    Noop,
    Rejected,
}

impl HistoryOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "applied" => Some(Self::Applied),
            "noop" => Some(Self::Noop),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub outcome: HistoryOutcome,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HistoryEntry {
    pub fn new(cmd: impl Into<String>, id: Option<String>, outcome: HistoryOutcome) -> Self {
        Self {
            cmd: cmd.into(),
            id,
            outcome,
            at: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Canonical, serializable state of a whole graph.
///
/// `extra` holds unknown top-level fields (planner metadata). They survive a
/// validate/encode round trip but nothing in the core reads them.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub nodes: BTreeMap<String, Node>,
    pub edges: BTreeMap<String, Vec<String>>,
    pub current_frontier: Vec<String>,
    pub history: Vec<HistoryEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Snapshot {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    pub fn count_with_status(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|n| n.status == status).count()
    }

    pub fn is_finished(&self) -> bool {
        self.nodes.values().all(Node::is_terminal)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
