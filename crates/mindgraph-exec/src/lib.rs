//! mindgraph-exec — graph store and loop-governed execution scheduler
//!
//! The planner grows the graph through a closed command vocabulary; the
//! scheduler dispatches ready nodes to the search chain and guarantees
//! termination through the visit ledger and the global deadline.

pub mod context;
pub mod graph;
pub mod ledger;
pub mod scheduler;

pub use context::RunContext;
pub use graph::{CommandOutcome, GraphStore};
pub use ledger::VisitLedger;
pub use scheduler::Scheduler;
