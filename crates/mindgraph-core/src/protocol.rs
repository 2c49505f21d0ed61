//! Planner ↔ core protocol
//!
//! Wire format (one JSON object per command / event):
//!
//! Planner → Core (commands):
//!   { "cmd": "AddNode", "id": "n2", "query": "weather NYC" }
//!   { "cmd": "AddNode", "id": "n1", "query": "root question", "kind": "ROOT" }
//!   { "cmd": "AddEdge", "parent_id": "n1", "child_id": "n2" }
//!   { "cmd": "Finish" }
//!
//! Core → Host (events):
//!   { "event": "NodeStarted", "id": "n2" }
//!   { "event": "NodeFinished", "id": "n2", "status": "SUCCESS" }
//!   { "event": "LoopDetected", "id": "n2", "visit_count": 4 }
//!   { "event": "TimedOut" }
//!
//! The command vocabulary is closed: anything that does not deserialize into
//! a `PlannerCommand` never reaches the graph.

use crate::types::{NodeKind, NodeStatus};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Planner → Core
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum PlannerCommand {
    AddNode {
        id: String,
        query: String,
        #[serde(default)]
        kind: NodeKind,
    },
    AddEdge {
        parent_id: String,
        child_id: String,
    },
    /// The planner will not issue further commands.
    Finish,
}

impl PlannerCommand {
    pub fn add_node(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self::AddNode {
            id: id.into(),
            query: query.into(),
            kind: NodeKind::Search,
        }
    }

    pub fn add_root(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self::AddNode {
            id: id.into(),
            query: query.into(),
            kind: NodeKind::Root,
        }
    }

    pub fn add_edge(parent_id: impl Into<String>, child_id: impl Into<String>) -> Self {
        Self::AddEdge {
            parent_id: parent_id.into(),
            child_id: child_id.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AddNode { .. } => "AddNode",
            Self::AddEdge { .. } => "AddEdge",
            Self::Finish => "Finish",
        }
    }

    /// The node id a command is about, for history and events.
    pub fn subject(&self) -> Option<String> {
        match self {
            Self::AddNode { id, .. } => Some(id.clone()),
            Self::AddEdge {
                parent_id,
                child_id,
            } => Some(format!("{}->{}", parent_id, child_id)),
            Self::Finish => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Core → Host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ExecutionEvent {
    NodeStarted {
        id: String,
    },
    NodeFinished {
        id: String,
        status: NodeStatus,
    },
    LoopDetected {
        id: String,
        visit_count: u32,
    },
    TimedOut,
    CommandRejected {
        cmd: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        reason: String,
        message: String,
    },
    RunFinished {
        run_id: String,
        nodes: usize,
        elapsed_ms: u64,
    },
}

impl ExecutionEvent {
    pub fn started(id: impl Into<String>) -> Self {
        Self::NodeStarted { id: id.into() }
    }

    pub fn finished(id: impl Into<String>, status: NodeStatus) -> Self {
        Self::NodeFinished {
            id: id.into(),
            status,
        }
    }

    pub fn loop_detected(id: impl Into<String>, visit_count: u32) -> Self {
        Self::LoopDetected {
            id: id.into(),
            visit_count,
        }
    }

    pub fn rejected(command: &PlannerCommand, error: &crate::Error) -> Self {
        Self::CommandRejected {
            cmd: command.name().to_string(),
            subject: command.subject(),
            reason: error.kind().to_string(),
            message: error.to_string(),
        }
    }

    /// Node id the event refers to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { id }
            | Self::NodeFinished { id, .. }
            | Self::LoopDetected { id, .. } => Some(id),
            _ => None,
        }
    }
}
