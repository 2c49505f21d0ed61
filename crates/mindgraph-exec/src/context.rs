//! Per-run context: identity, ledger, event channel, cancellation.
//!
//! The run deadline is not kept here; it starts when the scheduler starts
//! driving the run.

use crate::ledger::VisitLedger;
use mindgraph_core::{ExecutionEvent, SchedulerConfig};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub struct RunContext {
    pub run_id: String,
    pub ledger: Arc<VisitLedger>,
    pub cancel: CancellationToken,
    events: mpsc::UnboundedSender<ExecutionEvent>,
}

impl RunContext {
    /// Fresh context plus the receiving end of its event stream. Dropping
    /// the receiver is fine; events are then discarded.
    pub fn new(config: &SchedulerConfig) -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            ledger: Arc::new(VisitLedger::with_window(config.loop_detection_window)),
            cancel: CancellationToken::new(),
            events: tx,
        };
        (ctx, rx)
    }

    pub fn emit(&self, event: ExecutionEvent) {
        trace!(run_id = %self.run_id, ?event, "event");
        let _ = self.events.send(event);
    }
}
