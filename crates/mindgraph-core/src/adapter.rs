//! Snapshot adapters — translate between the canonical snapshot and the
//! representations hosts actually store or send.
//!
//! Decoding is total: every adapter funnels its input through
//! `validate_and_correct`, so protocol quirks stay at the boundary and the
//! scheduler only ever sees canonical state.

use crate::types::{NodeKind, NodeStatus, Snapshot};
use crate::validator::{validate_and_correct, Correction};
use crate::Result;
use serde_json::{json, Map, Value};

/// Pluggable snapshot codec.
pub trait SnapshotAdapter: Send + Sync {
    /// Short format name ("json", "yaml", "adjacency").
    fn name(&self) -> &str;

    fn encode(&self, snapshot: &Snapshot) -> Result<Vec<u8>>;

    /// Never fails: unreadable input yields an empty snapshot and a correction.
    fn decode(&self, bytes: &[u8]) -> (Snapshot, Vec<Correction>);
}

fn unreadable(format: &str, error: impl std::fmt::Display) -> (Snapshot, Vec<Correction>) {
    let correction = Correction {
        path: String::new(),
        message: format!("unreadable {} input ({}); using an empty snapshot", format, error),
    };
    tracing::warn!("snapshot corrected: {}", correction.message);
    (Snapshot::default(), vec![correction])
}

// ---------------------------------------------------------------------------
// Canonical JSON
// ---------------------------------------------------------------------------

pub struct JsonAdapter;

impl SnapshotAdapter for JsonAdapter {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(snapshot)?)
    }

    fn decode(&self, bytes: &[u8]) -> (Snapshot, Vec<Correction>) {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(raw) => validate_and_correct(&raw),
            Err(e) => unreadable("json", e),
        }
    }
}

// ---------------------------------------------------------------------------
// YAML storage form
// ---------------------------------------------------------------------------

pub struct YamlAdapter;

impl SnapshotAdapter for YamlAdapter {
    fn name(&self) -> &str {
        "yaml"
    }

    fn encode(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(snapshot)?.into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> (Snapshot, Vec<Correction>) {
        match serde_yaml::from_slice::<Value>(bytes) {
            Ok(raw) => validate_and_correct(&raw),
            Err(e) => unreadable("yaml", e),
        }
    }
}

// ---------------------------------------------------------------------------
// Legacy adjacency-list graph state
// ---------------------------------------------------------------------------

/// The graph-state shape older planner hosts exchange:
///
/// ```text
/// { "nodes": { "n2": { "content": "sub query", "type": "search",
///                      "state": "completed", "response": {...} } },
///   "adjacency_list": { "n1": [ { "name": "n2", "state": 3 } ] } }
/// ```
///
/// Edge `state`: 1 = in progress, 2 = not started, 3 = completed.
pub struct AdjacencyAdapter;

impl AdjacencyAdapter {
    fn legacy_state(status: NodeStatus) -> &'static str {
        match status {
            NodeStatus::Waiting => "pending",
            NodeStatus::Searching => "searching",
            NodeStatus::Success => "completed",
            NodeStatus::Fail => "failed",
            NodeStatus::TerminatedLoop => "terminated",
        }
    }

    fn canonical_status(state: &str) -> String {
        match state {
            "pending" => "WAITING".into(),
            "searching" => "SEARCHING".into(),
            "completed" => "SUCCESS".into(),
            "failed" => "FAIL".into(),
            "terminated" => "TERMINATED_LOOP".into(),
            // Passed through so the validator drops and reports it.
            other => other.to_string(),
        }
    }

    fn edge_state(status: NodeStatus) -> u8 {
        match status {
            NodeStatus::Waiting => 2,
            NodeStatus::Searching => 1,
            _ => 3,
        }
    }

    /// Rewrite the legacy value into the canonical JSON shape.
    fn to_canonical(raw: &Value) -> Value {
        let Some(obj) = raw.as_object() else {
            return raw.clone();
        };
        let mut out = Map::new();

        if let Some(nodes) = obj.get("nodes") {
            let converted = match nodes.as_object() {
                Some(map) => Value::Object(
                    map.iter()
                        .map(|(id, rec)| (id.clone(), Self::node_to_canonical(rec)))
                        .collect(),
                ),
                None => nodes.clone(),
            };
            out.insert("nodes".into(), converted);
        }

        if let Some(adj) = obj.get("adjacency_list") {
            let converted = match adj.as_object() {
                Some(map) => Value::Object(
                    map.iter()
                        .map(|(parent, children)| {
                            let names = match children.as_array() {
                                Some(items) => Value::Array(
                                    items
                                        .iter()
                                        .map(|c| c.get("name").cloned().unwrap_or_else(|| c.clone()))
                                        .collect(),
                                ),
                                None => children.clone(),
                            };
                            (parent.clone(), names)
                        })
                        .collect(),
                ),
                None => adj.clone(),
            };
            out.insert("edges".into(), converted);
        }

        for (k, v) in obj {
            if k != "nodes" && k != "adjacency_list" {
                out.insert(k.clone(), v.clone());
            }
        }
        Value::Object(out)
    }

    fn node_to_canonical(rec: &Value) -> Value {
        let Some(obj) = rec.as_object() else {
            return rec.clone();
        };
        let mut node = Map::new();
        if let Some(content) = obj.get("content") {
            node.insert("query".into(), content.clone());
        }
        if let Some(kind) = obj.get("type").and_then(Value::as_str) {
            node.insert("kind".into(), json!(kind.to_uppercase()));
        }
        if let Some(state) = obj.get("state").and_then(Value::as_str) {
            node.insert("status".into(), json!(Self::canonical_status(state)));
        }
        if let Some(count) = obj.get("visit_count") {
            node.insert("visit_count".into(), count.clone());
        }
        if let Some(response) = obj.get("response").filter(|r| !r.is_null()) {
            node.insert("result".into(), Self::response_to_result(response));
        }
        Value::Object(node)
    }

    /// Legacy responses carry `content` plus a `ref2url` index → url map.
    fn response_to_result(response: &Value) -> Value {
        if response.get("hits").is_some() {
            return response.clone();
        }
        let content = response
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let hits: Vec<Value> = response
            .get("ref2url")
            .and_then(Value::as_object)
            .map(|refs| {
                refs.values()
                    .filter_map(Value::as_str)
                    .map(|url| {
                        json!({
                            "title": url,
                            "url": url,
                            "snippet": content,
                            "source_backend": "legacy",
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        json!({ "hits": hits })
    }
}

impl SnapshotAdapter for AdjacencyAdapter {
    fn name(&self) -> &str {
        "adjacency"
    }

    fn encode(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        let nodes: Map<String, Value> = snapshot
            .nodes
            .iter()
            .map(|(id, n)| {
                let kind = match n.kind {
                    NodeKind::Root => "root",
                    NodeKind::Search => "search",
                };
                let rec = json!({
                    "content": n.query,
                    "type": kind,
                    "state": Self::legacy_state(n.status),
                    "visit_count": n.visit_count,
                    "response": n.result,
                });
                (id.clone(), rec)
            })
            .collect();

        let adjacency: Map<String, Value> = snapshot
            .edges
            .iter()
            .map(|(parent, children)| {
                let list: Vec<Value> = children
                    .iter()
                    .map(|c| {
                        let state = snapshot
                            .status_of(c)
                            .map(Self::edge_state)
                            .unwrap_or(2);
                        json!({ "name": c, "state": state })
                    })
                    .collect();
                (parent.clone(), Value::Array(list))
            })
            .collect();

        let mut out = Map::new();
        out.insert("nodes".into(), Value::Object(nodes));
        out.insert("adjacency_list".into(), Value::Object(adjacency));
        Ok(serde_json::to_vec_pretty(&Value::Object(out))?)
    }

    fn decode(&self, bytes: &[u8]) -> (Snapshot, Vec<Correction>) {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(raw) => validate_and_correct(&Self::to_canonical(&raw)),
            Err(e) => unreadable("adjacency", e),
        }
    }
}

/// Pick an adapter by format name.
pub fn adapter_for(format: &str) -> Option<Box<dyn SnapshotAdapter>> {
    match format {
        "json" => Some(Box::new(JsonAdapter)),
        "yaml" | "yml" => Some(Box::new(YamlAdapter)),
        "adjacency" => Some(Box::new(AdjacencyAdapter)),
        _ => None,
    }
}
