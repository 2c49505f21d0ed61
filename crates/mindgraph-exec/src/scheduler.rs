//! Execution scheduler — the loop governor.
//!
//! One task drives ticks over the graph store. Ready nodes are charged to
//! the visit ledger before dispatch; a node whose count passes
//! `max_node_visits` is forced TERMINATED_LOOP instead of searched.
//! Dispatches run in a `JoinSet` gated by a semaphore and only hand back
//! `(node_id, outcome)`; the scheduler alone writes node state.
//!
//! A run always returns a snapshot: at quiescence, or at the global
//! deadline plus the grace period.

use crate::context::RunContext;
use crate::graph::GraphStore;
use futures::FutureExt;
use mindgraph_core::{
    revalidate, EngineConfig, ExecutionEvent, FallbackReason, NodeStatus, PlannerCommand,
    SchedulerConfig, SearchHit, SearchResult, Snapshot,
};
use mindgraph_search::{BackendChain, SearchRequest};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

type DispatchOutcome = Result<Vec<SearchHit>, String>;

pub struct Scheduler {
    config: SchedulerConfig,
    max_results: usize,
    chain: Arc<BackendChain>,
}

/// Mutable state of one run, owned by the driving task.
struct RunState {
    store: GraphStore,
    tasks: JoinSet<(String, DispatchOutcome)>,
    semaphore: Arc<Semaphore>,
    planner_open: bool,
}

impl Scheduler {
    pub fn new(config: &EngineConfig, chain: Arc<BackendChain>) -> Self {
        Self {
            config: config.scheduler.clone(),
            max_results: config.search.max_results,
            chain,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run a fresh graph driven by `commands` until quiescence or timeout.
    pub async fn run(
        &self,
        ctx: &RunContext,
        commands: mpsc::Receiver<PlannerCommand>,
    ) -> Snapshot {
        self.drive(ctx, GraphStore::new(), commands).await
    }

    /// Continue from a host-supplied snapshot. Ledger counts are seeded from
    /// the snapshot; nodes caught mid-search are failed as interrupted.
    pub async fn resume(
        &self,
        ctx: &RunContext,
        snapshot: &Snapshot,
        commands: mpsc::Receiver<PlannerCommand>,
    ) -> Snapshot {
        let (mut store, corrections) = GraphStore::from_snapshot(snapshot);
        if !corrections.is_empty() {
            warn!(run_id = %ctx.run_id, corrections = corrections.len(), "resume snapshot needed corrections");
        }
        // Counts above the limit are capped so the next charge lands on
        // exactly max_node_visits + 1.
        let max = self.config.max_node_visits;
        let seeds: Vec<(String, u32, bool)> = store
            .nodes()
            .map(|n| (n.id.clone(), n.visit_count, n.is_terminal()))
            .collect();
        for (id, count, terminal) in seeds {
            let ceiling = if terminal { max.saturating_add(1) } else { max };
            if count > ceiling {
                warn!(run_id = %ctx.run_id, node = %id, visit_count = count, ceiling, "resumed visit count above limit, capped");
                store.cap_visits(&id, ceiling);
            }
            ctx.ledger.seed(&id, count.min(ceiling));
        }
        for id in store.ids_with_status(NodeStatus::Searching) {
            let query = store.node(&id).map(|n| n.query.clone()).unwrap_or_default();
            if store.finalize(
                &id,
                NodeStatus::Fail,
                SearchResult::fallback(query, FallbackReason::Interrupted),
            ) {
                info!(node = %id, "search interrupted by restart, marked FAIL");
                ctx.emit(ExecutionEvent::finished(&id, NodeStatus::Fail));
            }
        }
        self.drive(ctx, store, commands).await
    }

    /// Convenience for hosts holding a fixed plan: feeds every command and
    /// closes the channel.
    pub async fn run_commands(&self, ctx: &RunContext, commands: Vec<PlannerCommand>) -> Snapshot {
        self.run(ctx, Self::preloaded(commands)).await
    }

    pub async fn resume_commands(
        &self,
        ctx: &RunContext,
        snapshot: &Snapshot,
        commands: Vec<PlannerCommand>,
    ) -> Snapshot {
        self.resume(ctx, snapshot, Self::preloaded(commands)).await
    }

    fn preloaded(commands: Vec<PlannerCommand>) -> mpsc::Receiver<PlannerCommand> {
        let (tx, rx) = mpsc::channel(commands.len().max(1));
        for cmd in commands {
            // Capacity matches the plan length.
            let _ = tx.try_send(cmd);
        }
        rx
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    async fn drive(
        &self,
        ctx: &RunContext,
        store: GraphStore,
        mut commands: mpsc::Receiver<PlannerCommand>,
    ) -> Snapshot {
        info!(
            run_id = %ctx.run_id,
            max_node_visits = self.config.max_node_visits,
            workers = self.config.worker_pool_size,
            "run started"
        );
        let started = Instant::now();
        let deadline = started + self.config.execution_timeout();
        let mut run = RunState {
            planner_open: !store.planner_finished(),
            store,
            tasks: JoinSet::new(),
            semaphore: Arc::new(Semaphore::new(self.config.worker_pool_size.max(1))),
        };
        let mut timed_out = false;

        loop {
            self.drain_commands(ctx, &mut run, &mut commands);
            self.charge_in_flight(ctx, &mut run.store);
            self.dispatch_ready(ctx, &mut run);

            if !run.planner_open && run.tasks.is_empty() {
                self.terminate_stranded(ctx, &mut run.store);
                break;
            }

            tokio::select! {
                Some(joined) = run.tasks.join_next(), if !run.tasks.is_empty() => {
                    self.complete(ctx, &mut run.store, joined);
                }
                cmd = commands.recv(), if run.planner_open => match cmd {
                    Some(cmd) => self.apply(ctx, &mut run, cmd),
                    None => {
                        debug!(run_id = %ctx.run_id, "planner channel closed");
                        run.planner_open = false;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            self.on_timeout(ctx, &mut run).await;
        }

        let snapshot = run.store.snapshot();
        let (snapshot, corrections) = revalidate(&snapshot);
        if !corrections.is_empty() {
            warn!(run_id = %ctx.run_id, corrections = corrections.len(), "final snapshot needed corrections");
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            run_id = %ctx.run_id,
            nodes = snapshot.nodes.len(),
            success = snapshot.count_with_status(NodeStatus::Success),
            fail = snapshot.count_with_status(NodeStatus::Fail),
            terminated = snapshot.count_with_status(NodeStatus::TerminatedLoop),
            elapsed_ms,
            timed_out,
            "run finished"
        );
        ctx.emit(ExecutionEvent::RunFinished {
            run_id: ctx.run_id.clone(),
            nodes: snapshot.nodes.len(),
            elapsed_ms,
        });
        snapshot
    }

    fn drain_commands(
        &self,
        ctx: &RunContext,
        run: &mut RunState,
        commands: &mut mpsc::Receiver<PlannerCommand>,
    ) {
        while run.planner_open {
            match commands.try_recv() {
                Ok(cmd) => self.apply(ctx, run, cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!(run_id = %ctx.run_id, "planner channel closed");
                    run.planner_open = false;
                }
            }
        }
    }

    fn apply(&self, ctx: &RunContext, run: &mut RunState, cmd: PlannerCommand) {
        match run.store.apply(&cmd) {
            Ok(outcome) => {
                debug!(cmd = cmd.name(), subject = ?cmd.subject(), ?outcome, "command applied");
            }
            Err(e) => {
                warn!(cmd = cmd.name(), subject = ?cmd.subject(), "command rejected: {}", e);
                ctx.emit(ExecutionEvent::rejected(&cmd, &e));
            }
        }
        if run.store.planner_finished() {
            run.planner_open = false;
        }
    }

    // ------------------------------------------------------------------
    // Loop governor
    // ------------------------------------------------------------------

    /// Charge one attempt to the ledger. Returns false once the node has
    /// been forced terminal.
    fn charge(&self, ctx: &RunContext, store: &mut GraphStore, id: &str) -> bool {
        let count = ctx.ledger.increment(id);
        store.record_visits(id, count);
        if count > self.config.max_node_visits {
            self.force_loop(ctx, store, id, count);
            return false;
        }
        if let Some(pattern) = ctx.ledger.record_attempt(id) {
            warn!(run_id = %ctx.run_id, ?pattern, "repeating dispatch pattern detected");
            for member in &pattern {
                let visits = ctx.ledger.get(member);
                if store.node(member).is_some_and(|n| !n.is_terminal()) {
                    self.force_loop(ctx, store, member, visits);
                }
            }
        }
        store.node(id).is_some_and(|n| !n.is_terminal())
    }

    fn force_loop(&self, ctx: &RunContext, store: &mut GraphStore, id: &str, visit_count: u32) {
        let query = store.node(id).map(|n| n.query.clone()).unwrap_or_default();
        if store.finalize(
            id,
            NodeStatus::TerminatedLoop,
            SearchResult::fallback(query, FallbackReason::Loop),
        ) {
            warn!(run_id = %ctx.run_id, node = id, visit_count, "loop detected, node terminated");
            ctx.emit(ExecutionEvent::loop_detected(id, visit_count));
            ctx.emit(ExecutionEvent::finished(id, NodeStatus::TerminatedLoop));
        }
    }

    fn charge_in_flight(&self, ctx: &RunContext, store: &mut GraphStore) {
        for id in store.in_flight_revisits() {
            let requests = store.take_requests(&id);
            for _ in 0..requests {
                if !self.charge(ctx, store, &id) {
                    break;
                }
            }
        }
    }

    fn dispatch_ready(&self, ctx: &RunContext, run: &mut RunState) {
        // Forcing a node terminal can make its children ready, so repeat
        // until a pass finds nothing.
        loop {
            let ready = run.store.ready_nodes();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                let requests = run.store.take_requests(&id).max(1);
                let mut alive = true;
                for _ in 0..requests {
                    if !self.charge(ctx, &mut run.store, &id) {
                        alive = false;
                        break;
                    }
                }
                if alive && run.store.mark_searching(&id) {
                    self.spawn_dispatch(ctx, run, &id);
                }
            }
        }
    }

    fn spawn_dispatch(&self, ctx: &RunContext, run: &mut RunState, id: &str) {
        let Some(node) = run.store.node(id) else {
            return;
        };
        let request = SearchRequest::new(node.query.clone())
            .with_max_results(self.max_results)
            .with_context(run.store.parent_results(id));
        debug!(
            run_id = %ctx.run_id,
            node = id,
            query = %request.query,
            visit = node.visit_count,
            "dispatching search"
        );
        ctx.emit(ExecutionEvent::started(id));

        let chain = self.chain.clone();
        let semaphore = run.semaphore.clone();
        let cancel = ctx.cancel.clone();
        let node_id = id.to_string();
        run.tasks.spawn(async move {
            let search = async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| format!("worker pool closed: {}", e))?;
                Ok::<_, String>(chain.search(&request, &cancel).await)
            };
            let outcome = match AssertUnwindSafe(search).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(panic_message(panic)),
            };
            (node_id, outcome)
        });
    }

    fn complete(
        &self,
        ctx: &RunContext,
        store: &mut GraphStore,
        joined: Result<(String, DispatchOutcome), JoinError>,
    ) {
        let (id, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                warn!(run_id = %ctx.run_id, "dispatch task lost: {}", e);
                return;
            }
        };
        let query = store.node(&id).map(|n| n.query.clone()).unwrap_or_default();
        let (status, result) = match outcome {
            Ok(hits) if !hits.is_empty() => (NodeStatus::Success, SearchResult::new(query, hits)),
            Ok(_) => {
                warn!(run_id = %ctx.run_id, node = %id, "search produced no hits");
                (NodeStatus::Fail, SearchResult::fallback(query, FallbackReason::Error))
            }
            Err(message) => {
                warn!(run_id = %ctx.run_id, node = %id, "dispatch failed: {}", message);
                (NodeStatus::Fail, SearchResult::fallback(query, FallbackReason::Error))
            }
        };
        if store.finalize(&id, status, result) {
            debug!(run_id = %ctx.run_id, node = %id, %status, "node finished");
            ctx.emit(ExecutionEvent::finished(&id, status));
        } else {
            debug!(run_id = %ctx.run_id, node = %id, "result discarded, node already terminal");
        }
    }

    /// Planner done and nothing in flight: whatever still waits can never
    /// become ready (dependency cycle).
    fn terminate_stranded(&self, ctx: &RunContext, store: &mut GraphStore) {
        // A SEARCHING node with no task left lost its dispatch to a join error.
        for id in store.ids_with_status(NodeStatus::Searching) {
            let query = store.node(&id).map(|n| n.query.clone()).unwrap_or_default();
            if store.finalize(&id, NodeStatus::Fail, SearchResult::fallback(query, FallbackReason::Error)) {
                ctx.emit(ExecutionEvent::finished(&id, NodeStatus::Fail));
            }
        }
        for id in store.ids_with_status(NodeStatus::Waiting) {
            let visits = ctx.ledger.get(&id);
            self.force_loop(ctx, store, &id, visits);
        }
    }

    async fn on_timeout(&self, ctx: &RunContext, run: &mut RunState) {
        warn!(
            run_id = %ctx.run_id,
            in_flight = run.tasks.len(),
            timeout_ms = self.config.execution_timeout_ms,
            "execution timed out"
        );
        ctx.emit(ExecutionEvent::TimedOut);

        let grace = tokio::time::sleep(self.config.grace_period());
        tokio::pin!(grace);
        while !run.tasks.is_empty() {
            tokio::select! {
                Some(joined) = run.tasks.join_next() => self.complete(ctx, &mut run.store, joined),
                _ = &mut grace => break,
            }
        }
        ctx.cancel.cancel();
        run.tasks.shutdown().await;

        for id in run.store.frontier() {
            let Some(node) = run.store.node(&id) else {
                continue;
            };
            let status = match node.status {
                NodeStatus::Searching => NodeStatus::Fail,
                _ => NodeStatus::TerminatedLoop,
            };
            let result = SearchResult::fallback(node.query.clone(), FallbackReason::Timeout);
            if run.store.finalize(&id, status, result) {
                ctx.emit(ExecutionEvent::finished(&id, status));
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("search panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("search panicked: {}", s)
    } else {
        "search panicked".to_string()
    }
}
