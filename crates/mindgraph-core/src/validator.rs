//! Snapshot validator — one total normalization pass for inbound state.
//!
//! `validate_and_correct` accepts any JSON value and always produces a
//! canonical `Snapshot`. Structural defects are repaired or dropped and each
//! repair is reported as a `Correction`; nothing here returns an error or
//! panics. Business data (queries, hits) is never invented: the only values
//! synthesized are empty defaults and `repair-fallback` results for terminal
//! nodes that lost theirs.

use crate::types::{
    FallbackReason, HistoryEntry, HistoryOutcome, Node, NodeKind, NodeStatus, SearchHit,
    SearchResult, Snapshot,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

const KNOWN_FIELDS: [&str; 4] = ["nodes", "edges", "current_frontier", "history"];

/// One repair applied while normalizing a snapshot.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Correction {
    /// Location of the defect, e.g. `/nodes/n2/status`.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Correction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Default)]
struct Corrections(Vec<Correction>);

impl Corrections {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        let correction = Correction {
            path: path.into(),
            message: message.into(),
        };
        warn!(path = %correction.path, "snapshot corrected: {}", correction.message);
        self.0.push(correction);
    }
}

/// Normalize any JSON value into a canonical snapshot.
pub fn validate_and_correct(raw: &Value) -> (Snapshot, Vec<Correction>) {
    let mut fixes = Corrections::default();

    let Some(obj) = raw.as_object() else {
        fixes.push(
            "",
            format!("expected an object, got {}; using an empty snapshot", type_name(raw)),
        );
        return (Snapshot::default(), fixes.0);
    };

    let nodes = match field_object(obj, "nodes", &mut fixes) {
        Some(map) => validate_nodes(map, &mut fixes),
        None => BTreeMap::new(),
    };

    let edges = match field_object(obj, "edges", &mut fixes) {
        Some(map) => validate_edges(map, &nodes, &mut fixes),
        None => BTreeMap::new(),
    };

    let current_frontier = match field_array(obj, "current_frontier", &mut fixes) {
        Some(items) => validate_frontier(items, &nodes, &mut fixes),
        None => Vec::new(),
    };

    let history = match field_array(obj, "history", &mut fixes) {
        Some(items) => validate_history(items, &mut fixes),
        None => Vec::new(),
    };

    let extra: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let snapshot = Snapshot {
        nodes,
        edges,
        current_frontier,
        history,
        extra,
    };
    (snapshot, fixes.0)
}

/// Re-run the validator over an already typed snapshot.
pub fn revalidate(snapshot: &Snapshot) -> (Snapshot, Vec<Correction>) {
    validate_and_correct(&snapshot.to_json())
}

// ---------------------------------------------------------------------------
// Top-level fields
// ---------------------------------------------------------------------------

fn field_object<'a>(
    obj: &'a Map<String, Value>,
    name: &str,
    fixes: &mut Corrections,
) -> Option<&'a Map<String, Value>> {
    match obj.get(name) {
        None => None,
        Some(Value::Object(map)) => Some(map),
        Some(other) => {
            fixes.push(
                format!("/{}", name),
                format!("expected a mapping, got {}; replaced with {{}}", type_name(other)),
            );
            None
        }
    }
}

fn field_array<'a>(
    obj: &'a Map<String, Value>,
    name: &str,
    fixes: &mut Corrections,
) -> Option<&'a Vec<Value>> {
    match obj.get(name) {
        None => None,
        Some(Value::Array(items)) => Some(items),
        Some(other) => {
            fixes.push(
                format!("/{}", name),
                format!("expected a list, got {}; replaced with []", type_name(other)),
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

fn validate_nodes(map: &Map<String, Value>, fixes: &mut Corrections) -> BTreeMap<String, Node> {
    map.iter()
        .filter_map(|(key, record)| validate_node(key, record, fixes).map(|n| (n.id.clone(), n)))
        .collect()
}

fn validate_node(key: &str, record: &Value, fixes: &mut Corrections) -> Option<Node> {
    let path = format!("/nodes/{}", key);

    let Some(rec) = record.as_object() else {
        fixes.push(&path, format!("node record is {}, dropped", type_name(record)));
        return None;
    };

    if key.trim().is_empty() {
        fixes.push(&path, "node has no id, dropped");
        return None;
    }
    match rec.get("id") {
        None => {}
        Some(Value::String(id)) if id == key => {}
        Some(other) => fixes.push(
            format!("{}/id", path),
            format!("id {} disagrees with key, using {:?}", other, key),
        ),
    }

    let Some(query) = rec.get("query").and_then(Value::as_str) else {
        fixes.push(&path, "node has no string query, dropped");
        return None;
    };

    let kind = match rec.get("kind") {
        None => {
            fixes.push(format!("{}/kind", path), "missing kind, defaulted to SEARCH");
            NodeKind::Search
        }
        Some(v) => match v.as_str().and_then(NodeKind::parse) {
            Some(kind) => kind,
            None => {
                fixes.push(&path, format!("unknown kind {}, dropped", v));
                return None;
            }
        },
    };

    let status = match rec.get("status") {
        None => {
            fixes.push(format!("{}/status", path), "missing status, defaulted to WAITING");
            NodeStatus::Waiting
        }
        Some(v) => match v.as_str().and_then(NodeStatus::parse) {
            Some(status) => status,
            None => {
                fixes.push(&path, format!("unknown status {}, dropped", v));
                return None;
            }
        },
    };

    let visit_count = match rec.get("visit_count") {
        None => 0,
        Some(v) => match v.as_u64() {
            Some(n) => n.min(u32::MAX as u64) as u32,
            None => {
                fixes.push(
                    format!("{}/visit_count", path),
                    format!("visit_count {} is not a count, reset to 0", v),
                );
                0
            }
        },
    };

    let mut result = match rec.get("result") {
        None | Some(Value::Null) => None,
        Some(v) => parse_result(v, query, &format!("{}/result", path), fixes),
    };

    if status == NodeStatus::Success && result.as_ref().map_or(true, |r| r.hits.is_empty()) {
        fixes.push(&path, "SUCCESS node without hits, dropped");
        return None;
    }
    if status.is_terminal() && result.is_none() {
        fixes.push(
            format!("{}/result", path),
            format!("terminal {} node without result, attached repair-fallback", status),
        );
        result = Some(SearchResult::fallback(query, FallbackReason::Repair));
    }

    let now = Utc::now();
    Some(Node {
        id: key.to_string(),
        kind,
        query: query.to_string(),
        status,
        result,
        visit_count,
        created_at: parse_time(rec.get("created_at")).unwrap_or(now),
        updated_at: parse_time(rec.get("updated_at")).unwrap_or(now),
    })
}

fn parse_result(
    value: &Value,
    node_query: &str,
    path: &str,
    fixes: &mut Corrections,
) -> Option<SearchResult> {
    let Some(obj) = value.as_object() else {
        fixes.push(path, format!("result is {}, cleared", type_name(value)));
        return None;
    };
    let hits = match obj.get("hits") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, hit)| {
                let parsed = parse_hit(hit);
                if parsed.is_none() {
                    fixes.push(format!("{}/hits/{}", path, i), "malformed hit, dropped");
                }
                parsed
            })
            .collect(),
        Some(other) => {
            fixes.push(path, format!("hits is {}, result cleared", type_name(other)));
            return None;
        }
    };
    let fallback = obj
        .get("fallback")
        .and_then(|v| serde_json::from_value::<FallbackReason>(v.clone()).ok());
    Some(SearchResult {
        query: obj
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or(node_query)
            .to_string(),
        hits,
        fallback,
    })
}

fn parse_hit(value: &Value) -> Option<SearchHit> {
    let obj = value.as_object()?;
    let text = |k: &str| obj.get(k).and_then(Value::as_str).map(str::to_string);
    Some(SearchHit {
        title: text("title")?,
        url: text("url")?,
        snippet: text("snippet").unwrap_or_default(),
        source_backend: text("source_backend").unwrap_or_else(|| "unknown".into()),
        fetched_at: parse_time(obj.get("fetched_at")).unwrap_or_else(Utc::now),
    })
}

// ---------------------------------------------------------------------------
// Edges, frontier, history
// ---------------------------------------------------------------------------

fn validate_edges(
    map: &Map<String, Value>,
    nodes: &BTreeMap<String, Node>,
    fixes: &mut Corrections,
) -> BTreeMap<String, Vec<String>> {
    let mut edges = BTreeMap::new();
    for (parent, children) in map {
        let path = format!("/edges/{}", parent);
        if !nodes.contains_key(parent) {
            fixes.push(&path, "edge list for unknown node, dropped");
            continue;
        }
        let Some(items) = children.as_array() else {
            fixes.push(&path, format!("edge list is {}, dropped", type_name(children)));
            continue;
        };
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for child in items {
            match child.as_str() {
                Some(c) if c == parent => fixes.push(&path, format!("self-loop on {}, removed", c)),
                Some(c) if !nodes.contains_key(c) => {
                    fixes.push(&path, format!("edge to unknown node {}, removed", c))
                }
                Some(c) if !seen.insert(c) => {
                    fixes.push(&path, format!("duplicate edge to {}, removed", c))
                }
                Some(c) => kept.push(c.to_string()),
                None => fixes.push(&path, format!("child id {} is not a string, removed", child)),
            }
        }
        if !kept.is_empty() {
            edges.insert(parent.clone(), kept);
        }
    }
    edges
}

fn validate_frontier(
    items: &[Value],
    nodes: &BTreeMap<String, Node>,
    fixes: &mut Corrections,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut frontier = Vec::new();
    for item in items {
        match item.as_str() {
            Some(id) if nodes.contains_key(id) => {
                if seen.insert(id) {
                    frontier.push(id.to_string());
                }
            }
            _ => fixes.push(
                "/current_frontier",
                format!("frontier entry {} is not a known node id, removed", item),
            ),
        }
    }
    frontier
}

fn validate_history(items: &[Value], fixes: &mut Corrections) -> Vec<HistoryEntry> {
    let mut history = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let path = format!("/history/{}", i);
        let Some(obj) = item.as_object() else {
            fixes.push(&path, format!("history entry is {}, dropped", type_name(item)));
            continue;
        };
        let Some(cmd) = obj.get("cmd").and_then(Value::as_str) else {
            fixes.push(&path, "history entry has no cmd, dropped");
            continue;
        };
        let outcome = match obj.get("outcome").and_then(Value::as_str) {
            Some(s) => HistoryOutcome::parse(s).unwrap_or_else(|| {
                fixes.push(&path, format!("unknown outcome {:?}, recorded as noop", s));
                HistoryOutcome::Noop
            }),
            None => HistoryOutcome::Applied,
        };
        history.push(HistoryEntry {
            cmd: cmd.to_string(),
            id: obj.get("id").and_then(Value::as_str).map(str::to_string),
            outcome,
            at: parse_time(obj.get("at")).unwrap_or_else(Utc::now),
            detail: obj.get("detail").and_then(Value::as_str).map(str::to_string),
        });
    }
    history
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
