//! Graph store — the canonical node/edge graph for one run.
//!
//! Mutated only through the closed command vocabulary (`apply`) and the two
//! status writers (`mark_searching`, `finalize`), which enforce the node
//! state machine. The scheduler is the single writer.

use chrono::Utc;
use mindgraph_core::{
    revalidate, Correction, Error, HistoryEntry, HistoryOutcome, Node, NodeKind, NodeStatus,
    PlannerCommand, Result, SearchResult, Snapshot,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// What a successfully applied command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The graph changed.
    Applied,
    /// Idempotent repeat; nothing changed.
    Noop,
    /// Identical re-add of a node that has not finished yet.
    RevisitRequested,
}

#[derive(Default)]
pub struct GraphStore {
    nodes: HashMap<String, Node>,
    /// Node ids in insertion order.
    order: Vec<String>,
    children: HashMap<String, Vec<String>>,
    parents: HashMap<String, Vec<String>>,
    /// Outstanding dispatch requests per node (creation counts as one).
    requests: HashMap<String, u32>,
    history: Vec<HistoryEntry>,
    extra: serde_json::Map<String, serde_json::Value>,
    planner_finished: bool,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub fn apply(&mut self, command: &PlannerCommand) -> Result<CommandOutcome> {
        match command {
            PlannerCommand::AddNode { id, query, kind } => self.add_node(id, *kind, query),
            PlannerCommand::AddEdge {
                parent_id,
                child_id,
            } => self.add_edge(parent_id, child_id),
            PlannerCommand::Finish => {
                let outcome = if self.planner_finished {
                    HistoryOutcome::Noop
                } else {
                    HistoryOutcome::Applied
                };
                self.planner_finished = true;
                self.record("Finish", None, outcome, None);
                Ok(if outcome == HistoryOutcome::Applied {
                    CommandOutcome::Applied
                } else {
                    CommandOutcome::Noop
                })
            }
        }
    }

    pub fn add_node(&mut self, id: &str, kind: NodeKind, query: &str) -> Result<CommandOutcome> {
        if id.trim().is_empty() {
            let err = Error::invalid_command("AddNode requires a non-empty id");
            self.record("AddNode", Some(id), HistoryOutcome::Rejected, Some(err.to_string()));
            return Err(err);
        }

        if let Some(existing) = self.nodes.get(id) {
            if existing.query != query {
                let err = Error::conflicting(id, existing.query.clone(), query);
                self.record("AddNode", Some(id), HistoryOutcome::Rejected, Some(err.to_string()));
                return Err(err);
            }
            if existing.is_terminal() {
                self.record("AddNode", Some(id), HistoryOutcome::Noop, None);
                return Ok(CommandOutcome::Noop);
            }
            *self.requests.entry(id.to_string()).or_insert(0) += 1;
            self.record(
                "AddNode",
                Some(id),
                HistoryOutcome::Noop,
                Some("revisit requested".into()),
            );
            debug!(node = id, "revisit requested");
            return Ok(CommandOutcome::RevisitRequested);
        }

        self.nodes.insert(id.to_string(), Node::new(id, kind, query));
        self.order.push(id.to_string());
        self.requests.insert(id.to_string(), 1);
        self.record("AddNode", Some(id), HistoryOutcome::Applied, None);
        debug!(node = id, ?kind, "node added");
        Ok(CommandOutcome::Applied)
    }

    pub fn add_edge(&mut self, parent_id: &str, child_id: &str) -> Result<CommandOutcome> {
        let subject = format!("{}->{}", parent_id, child_id);
        let problem = if parent_id == child_id {
            Some(format!("self-loop on {}", parent_id))
        } else if !self.nodes.contains_key(parent_id) {
            Some(format!("unknown parent {}", parent_id))
        } else if !self.nodes.contains_key(child_id) {
            Some(format!("unknown child {}", child_id))
        } else {
            None
        };
        if let Some(reason) = problem {
            let err = Error::invalid_command(format!("AddEdge {}: {}", subject, reason));
            self.record("AddEdge", Some(subject.as_str()), HistoryOutcome::Rejected, Some(err.to_string()));
            return Err(err);
        }

        if self.children(parent_id).iter().any(|c| c == child_id) {
            self.record("AddEdge", Some(subject.as_str()), HistoryOutcome::Noop, None);
            return Ok(CommandOutcome::Noop);
        }
        self.children
            .entry(parent_id.to_string())
            .or_default()
            .push(child_id.to_string());
        self.parents
            .entry(child_id.to_string())
            .or_default()
            .push(parent_id.to_string());
        self.record("AddEdge", Some(subject.as_str()), HistoryOutcome::Applied, None);
        Ok(CommandOutcome::Applied)
    }

    fn record(&mut self, cmd: &str, id: Option<&str>, outcome: HistoryOutcome, detail: Option<String>) {
        let mut entry = HistoryEntry::new(cmd, id.map(str::to_string), outcome);
        entry.detail = detail;
        self.history.push(entry);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.order.iter().filter_map(move |id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parents(&self, id: &str) -> &[String] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// WAITING nodes whose parents are all terminal, in insertion order.
    pub fn ready_nodes(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| n.status == NodeStatus::Waiting)
            .filter(|n| {
                self.parents(&n.id)
                    .iter()
                    .all(|p| self.nodes.get(p).is_some_and(Node::is_terminal))
            })
            .map(|n| n.id.clone())
            .collect()
    }

    /// Non-terminal nodes, in insertion order.
    pub fn frontier(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| !n.is_terminal())
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn ids_with_status(&self, status: NodeStatus) -> Vec<String> {
        self.nodes()
            .filter(|n| n.status == status)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Results of the node's parents, in edge order.
    pub fn parent_results(&self, id: &str) -> Vec<SearchResult> {
        self.parents(id)
            .iter()
            .filter_map(|p| self.nodes.get(p).and_then(|n| n.result.clone()))
            .collect()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn planner_finished(&self) -> bool {
        self.planner_finished
    }

    // ------------------------------------------------------------------
    // Revisit requests
    // ------------------------------------------------------------------

    pub fn pending_requests(&self, id: &str) -> u32 {
        self.requests.get(id).copied().unwrap_or(0)
    }

    /// Drain the node's outstanding requests.
    pub fn take_requests(&mut self, id: &str) -> u32 {
        self.requests.remove(id).unwrap_or(0)
    }

    /// SEARCHING nodes that were asked for again while in flight.
    pub fn in_flight_revisits(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| n.status == NodeStatus::Searching && self.pending_requests(&n.id) > 0)
            .map(|n| n.id.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Status writes
    // ------------------------------------------------------------------

    pub fn record_visits(&mut self, id: &str, visit_count: u32) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.visit_count = node.visit_count.max(visit_count);
        }
    }

    /// Lower a node's visit count to at most `ceiling`.
    pub fn cap_visits(&mut self, id: &str, ceiling: u32) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.visit_count = node.visit_count.min(ceiling);
        }
    }

    pub fn mark_searching(&mut self, id: &str) -> bool {
        self.transition(id, NodeStatus::Searching, None)
    }

    /// Move a node to a terminal status with its result. Refused (and
    /// logged) if the state machine does not allow it.
    pub fn finalize(&mut self, id: &str, status: NodeStatus, result: SearchResult) -> bool {
        if !status.is_terminal() {
            warn!(node = id, %status, "finalize called with non-terminal status");
            return false;
        }
        self.transition(id, status, Some(result))
    }

    fn transition(&mut self, id: &str, next: NodeStatus, result: Option<SearchResult>) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            warn!(node = id, %next, "status write for unknown node");
            return false;
        };
        if !node.status.can_transition_to(next) {
            if node.is_terminal() {
                debug!(node = id, from = %node.status, to = %next, "node already terminal, write ignored");
            } else {
                warn!(node = id, from = %node.status, to = %next, "illegal status transition refused");
            }
            return false;
        }
        node.status = next;
        if result.is_some() {
            node.result = result;
        }
        node.updated_at = Utc::now();
        if next.is_terminal() {
            self.requests.remove(id);
        }
        true
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        let nodes: BTreeMap<String, Node> = self
            .nodes
            .iter()
            .map(|(id, n)| (id.clone(), n.clone()))
            .collect();
        let edges: BTreeMap<String, Vec<String>> = self
            .children
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        Snapshot {
            nodes,
            edges,
            current_frontier: self.frontier(),
            history: self.history.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Rebuild a store from a snapshot, running it through the validator first.
    /// Every WAITING node starts with one outstanding request.
    pub fn from_snapshot(snapshot: &Snapshot) -> (Self, Vec<Correction>) {
        let (clean, corrections) = revalidate(snapshot);
        let mut store = Self {
            history: clean.history,
            extra: clean.extra,
            ..Self::default()
        };

        let mut nodes: Vec<Node> = clean.nodes.into_values().collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for node in nodes {
            if node.status == NodeStatus::Waiting {
                store.requests.insert(node.id.clone(), 1);
            }
            store.order.push(node.id.clone());
            store.nodes.insert(node.id.clone(), node);
        }
        for (parent, children) in clean.edges {
            for child in children {
                store.parents.entry(child.clone()).or_default().push(parent.clone());
                store.children.entry(parent.clone()).or_default().push(child);
            }
        }
        (store, corrections)
    }
}
