// contract-kernel: DAG orchestrator built on top of ContractPool. Schedules
// each node once its parents all complete, cascades failure through
// dependents, supports bounded yield/reschedule, and buffers nodes that
// arrive while the pool is at capacity.

use crate::contract_pool::{CapacityCallbackToken, ContractHandle, ContractPool, ExecType};
use crate::dag::{Dag, NodeHandle};
use crate::error::GraphError;
use crate::events::{Event, EventBus, GraphStatsSnapshot, Publisher, WaitSummary, WorkError};
use crate::worker_service::current_thread_id;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of a yieldable callable's single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldOutcome {
    Complete,
    Yield,
}

pub type VoidWork = Box<dyn Fn() + Send + Sync + 'static>;
pub type YieldableWork = Box<dyn Fn() -> YieldOutcome + Send + Sync + 'static>;

/// A node's callable. Void work runs to completion in one invocation;
/// yieldable work may be invoked repeatedly, once per reschedule, until it
/// returns `Complete` or exhausts `maxReschedules`.
pub enum NodeWork {
    Void(VoidWork),
    Yieldable(YieldableWork),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Pending = 0,
    Ready = 1,
    Scheduled = 2,
    Executing = 3,
    Completed = 4,
    Failed = 5,
    Cancelled = 6,
    Yielded = 7,
}

impl NodeState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => NodeState::Pending,
            1 => NodeState::Ready,
            2 => NodeState::Scheduled,
            3 => NodeState::Executing,
            4 => NodeState::Completed,
            5 => NodeState::Failed,
            6 => NodeState::Cancelled,
            _ => NodeState::Yielded,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Completed | NodeState::Failed | NodeState::Cancelled)
    }
}

/// The node-state transition table from the data model, encoded as data
/// rather than scattered matches.
///
/// Extends the base {Pending,Ready,Scheduled}->Cancelled and
/// Executing->{Completed,Failed,Yielded} pairs with three additional
/// Failed-arriving edges (Pending/Ready/Scheduled/Yielded -> Failed) to
/// honor the dropped-node and exhausted-yield scenarios, both of which
/// land directly on Failed rather than passing through Cancelled.
fn legal_transition(from: NodeState, to: NodeState) -> bool {
    use NodeState::*;
    matches!(
        (from, to),
        (Pending, Ready)
            | (Pending, Cancelled)
            | (Pending, Failed)
            | (Ready, Scheduled)
            | (Ready, Cancelled)
            | (Ready, Failed)
            | (Scheduled, Executing)
            | (Scheduled, Cancelled)
            | (Scheduled, Failed)
            | (Executing, Completed)
            | (Executing, Failed)
            | (Executing, Yielded)
            | (Yielded, Ready)
            | (Yielded, Cancelled)
            | (Yielded, Failed)
    )
}

/// Distinguishes the two ways a node can land in the terminal Failed state,
/// so the outcome is counted in exactly one of `counters.failed` /
/// `counters.dropped` — never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailKind {
    Failed,
    Dropped,
}

struct NodeRecord {
    state: AtomicU32,
    work: Mutex<Option<NodeWork>>,
    handle: Mutex<ContractHandle>,
    pending_dependencies: AtomicU32,
    failed_parent_count: AtomicU32,
    completion_processed: AtomicBool,
    exec_type: ExecType,
    reschedule_count: AtomicU32,
    max_reschedules: Option<u32>,
    name: Option<String>,
    started_at: Mutex<Option<Instant>>,
}

impl NodeRecord {
    fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire) as u8)
    }

    /// Attempts `from -> to`; rejects illegal pairs even if the atomic CAS
    /// would otherwise succeed, so a caller's bug can't forge a transition.
    fn try_transition(&self, from: NodeState, to: NodeState) -> bool {
        if !legal_transition(from, to) {
            return false;
        }
        self.state
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Configuration accepted by [`WorkGraphBuilder`].
#[derive(Debug, Clone)]
pub struct WorkGraphConfig {
    pub enable_events: bool,
    pub enable_advanced_scheduling: bool,
    pub expected_node_count: usize,
    pub max_deferred_nodes: usize,
    pub max_deferred_processing_iterations: u32,
    pub batch_size: usize,
}

impl Default for WorkGraphConfig {
    fn default() -> Self {
        Self {
            enable_events: true,
            enable_advanced_scheduling: false,
            expected_node_count: 0,
            max_deferred_nodes: 0,
            max_deferred_processing_iterations: 4,
            batch_size: 8,
        }
    }
}

/// Builder mirroring the pool's plain-constructor style but with enough
/// optional knobs (events, batching, deferred-queue bound) to warrant one.
pub struct WorkGraphBuilder {
    config: WorkGraphConfig,
    shared_event_bus: Option<Arc<dyn Publisher>>,
}

impl WorkGraphBuilder {
    pub fn new() -> Self {
        Self { config: WorkGraphConfig::default(), shared_event_bus: None }
    }

    pub fn enable_events(mut self, enable: bool) -> Self {
        self.config.enable_events = enable;
        self
    }

    pub fn enable_advanced_scheduling(mut self, enable: bool) -> Self {
        self.config.enable_advanced_scheduling = enable;
        self
    }

    pub fn expected_node_count(mut self, count: usize) -> Self {
        self.config.expected_node_count = count;
        self
    }

    pub fn max_deferred_nodes(mut self, max: usize) -> Self {
        self.config.max_deferred_nodes = max;
        self
    }

    pub fn max_deferred_processing_iterations(mut self, iterations: u32) -> Self {
        self.config.max_deferred_processing_iterations = iterations;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    pub fn shared_event_bus(mut self, bus: Arc<dyn Publisher>) -> Self {
        self.shared_event_bus = Some(bus);
        self
    }

    pub fn build(self, pool: Arc<ContractPool>) -> Arc<WorkGraph> {
        WorkGraph::new(pool, self.config, self.shared_event_bus)
    }
}

impl Default for WorkGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct GraphCounters {
    pending_nodes: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    dropped: AtomicUsize,
}

impl GraphCounters {
    fn new() -> Self {
        Self {
            pending_nodes: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }
}

/// DAG-of-contracts orchestrator. Own a [`ContractPool`] reference (shared,
/// not exclusive — other graphs or direct pool users may coexist) and wraps
/// its own topology lock around the [`Dag`].
pub struct WorkGraph {
    pool: Arc<ContractPool>,
    dag: RwLock<Dag<NodeRecord>>,
    config: WorkGraphConfig,
    publisher: Arc<dyn Publisher>,
    counters: GraphCounters,
    deferred: Mutex<VecDeque<NodeHandle>>,
    execution_started: AtomicBool,
    suspended: AtomicBool,
    destroyed: AtomicBool,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
    capacity_token: Mutex<Option<CapacityCallbackToken>>,
}

impl WorkGraph {
    fn new(pool: Arc<ContractPool>, config: WorkGraphConfig, shared_bus: Option<Arc<dyn Publisher>>) -> Arc<Self> {
        let publisher: Arc<dyn Publisher> = shared_bus.unwrap_or_else(|| Arc::new(EventBus::new()));
        let graph = Arc::new(Self {
            pool,
            dag: RwLock::new(Dag::with_capacity(config.expected_node_count)),
            config,
            publisher,
            counters: GraphCounters::new(),
            deferred: Mutex::new(VecDeque::new()),
            execution_started: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
            capacity_token: Mutex::new(None),
        });

        let weak = Arc::downgrade(&graph);
        let token = graph.pool.on_capacity_available(Box::new(move || {
            if let Some(graph) = weak.upgrade() {
                graph.process_deferred_nodes();
            }
        }));
        *graph.capacity_token.lock() = Some(token);
        graph
    }

    fn publish(&self, event: Event) {
        if self.config.enable_events {
            self.publisher.publish(&event);
        }
    }

    /// Registers a void-returning node with no dependencies yet.
    pub fn add_node(self: &Arc<Self>, name: impl Into<Option<String>>, work: VoidWork) -> NodeHandle {
        self.add_node_with(name.into(), NodeWork::Void(work), None)
    }

    /// Registers a yieldable node, capped at `max_reschedules` reattempts
    /// (`None` means unbounded).
    pub fn add_yieldable_node(
        self: &Arc<Self>,
        name: impl Into<Option<String>>,
        work: YieldableWork,
        max_reschedules: Option<u32>,
    ) -> NodeHandle {
        self.add_node_with(name.into(), NodeWork::Yieldable(work), max_reschedules)
    }

    fn add_node_with(self: &Arc<Self>, name: Option<String>, work: NodeWork, max_reschedules: Option<u32>) -> NodeHandle {
        let record = NodeRecord {
            state: AtomicU32::new(NodeState::Pending as u32),
            work: Mutex::new(Some(work)),
            handle: Mutex::new(ContractHandle::INVALID),
            pending_dependencies: AtomicU32::new(0),
            failed_parent_count: AtomicU32::new(0),
            completion_processed: AtomicBool::new(false),
            exec_type: ExecType::AnyThread,
            reschedule_count: AtomicU32::new(0),
            max_reschedules,
            name,
            started_at: Mutex::new(None),
        };

        let handle = {
            let mut dag = self.dag.write();
            let handle = dag.add_node(record);
            self.counters.pending_nodes.fetch_add(1, Ordering::AcqRel);
            handle
        };
        self.publish(Event::NodeAdded(handle));

        if self.execution_started.load(Ordering::Acquire) {
            let ready_to_go = {
                let dag = self.dag.read();
                dag.parent_count(handle).unwrap_or(0) == 0
            };
            if ready_to_go {
                self.try_promote_and_submit(handle);
            }
        }

        handle
    }

    /// Adds a `from -> to` dependency edge. `to` will not run until `from`
    /// (and every other parent) completes successfully.
    pub fn add_dependency(self: &Arc<Self>, from: NodeHandle, to: NodeHandle) -> Result<(), GraphError> {
        {
            let mut dag = self.dag.write();
            dag.add_dependency(from, to)?;
            let record = dag.get(to)?;
            record.pending_dependencies.fetch_add(1, Ordering::AcqRel);
        }
        self.publish(Event::DependencyAdded(from, to));
        Ok(())
    }

    /// Starts execution: schedules every node with zero pending
    /// dependencies, then drains the deferred queue. Fails with
    /// `AlreadyStarted` on a second call.
    pub fn execute(self: &Arc<Self>) -> Result<(), GraphError> {
        if self
            .execution_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GraphError::AlreadyStarted);
        }

        let (total, roots) = {
            let dag = self.dag.read();
            let handles: Vec<NodeHandle> = dag.handles().collect();
            let roots: Vec<NodeHandle> = handles
                .iter()
                .copied()
                .filter(|&h| dag.parent_count(h).unwrap_or(0) == 0)
                .collect();
            (handles.len(), roots)
        };
        self.publish(Event::GraphExecutionStarted(total, roots.len()));

        let mut scheduled_any = false;
        for handle in roots {
            if self.try_promote_and_submit(handle) {
                scheduled_any = true;
            }
        }

        self.process_deferred_nodes();

        if !scheduled_any && self.counters.pending_nodes.load(Ordering::Acquire) > 0 {
            return Err(GraphError::CycleOrOrphan);
        }
        Ok(())
    }

    /// Pending -> Ready -> Scheduled -> submit. Returns false if the node
    /// could not even be moved to Ready/Scheduled (already transitioned by
    /// a racing cascade).
    fn try_promote_and_submit(self: &Arc<Self>, handle: NodeHandle) -> bool {
        let dag = self.dag.read();
        let Ok(record) = dag.get(handle) else { return false };
        if !record.try_transition(NodeState::Pending, NodeState::Ready) {
            return false;
        }
        self.publish(Event::NodeStateChanged(handle, NodeState::Pending, NodeState::Ready));
        self.publish(Event::NodeReady(handle));
        if !record.try_transition(NodeState::Ready, NodeState::Scheduled) {
            return false;
        }
        self.publish(Event::NodeStateChanged(handle, NodeState::Ready, NodeState::Scheduled));
        self.publish(Event::NodeScheduled(handle));
        drop(dag);
        self.submit(handle);
        true
    }

    fn submit(self: &Arc<Self>, handle: NodeHandle) {
        if self.suspended.load(Ordering::Acquire) {
            self.defer(handle);
            return;
        }

        let graph = self.clone();
        let contract_handle = self.pool.create(
            Box::new(move || graph.run_node(handle)),
            ExecType::AnyThread,
        );

        if !contract_handle.is_valid() {
            self.defer(handle);
            return;
        }

        {
            let dag = self.dag.read();
            if let Ok(record) = dag.get(handle) {
                *record.handle.lock() = contract_handle;
            }
        }
        self.pool.schedule(contract_handle);
    }

    fn defer(self: &Arc<Self>, handle: NodeHandle) {
        let mut deferred = self.deferred.lock();
        if self.config.max_deferred_nodes != 0 && deferred.len() >= self.config.max_deferred_nodes {
            drop(deferred);
            self.drop_node(handle);
            return;
        }
        deferred.push_back(handle);
        let depth = deferred.len();
        drop(deferred);
        self.publish(Event::NodeDeferred(handle, depth));
    }

    fn drop_node(self: &Arc<Self>, handle: NodeHandle) {
        self.fail_node(
            handle,
            Arc::new(WorkError::from_panic_payload(&"deferred queue overflow")),
            FailKind::Dropped,
        );
    }

    fn process_deferred_nodes(self: &Arc<Self>) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        for _ in 0..self.config.max_deferred_processing_iterations {
            let next = {
                let mut deferred = self.deferred.lock();
                deferred.pop_front()
            };
            let Some(handle) = next else { break };
            self.submit(handle);
        }
    }

    fn run_node(self: &Arc<Self>, handle: NodeHandle) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }

        let Ok(transitioned) = ({
            let dag = self.dag.read();
            dag.get(handle).map(|record| record.try_transition(NodeState::Scheduled, NodeState::Executing))
        }) else {
            return;
        };
        if !transitioned {
            return;
        }
        self.publish(Event::NodeStateChanged(handle, NodeState::Scheduled, NodeState::Executing));
        self.publish(Event::NodeExecuting(handle, current_thread_id().unwrap_or(0)));

        let start = Instant::now();
        {
            let dag = self.dag.read();
            if let Ok(record) = dag.get(handle) {
                *record.started_at.lock() = Some(start);
            }
        }

        let outcome = self.invoke_work(handle);

        match outcome {
            Ok(YieldOutcome::Complete) => self.on_node_complete(handle),
            Ok(YieldOutcome::Yield) => self.on_node_yielded(handle),
            Err(error) => self.on_node_failed(handle, Arc::new(error)),
        }
    }

    fn invoke_work(self: &Arc<Self>, handle: NodeHandle) -> Result<YieldOutcome, WorkError> {
        let callable = {
            let dag = self.dag.read();
            match dag.get(handle) {
                Ok(record) => record.work.lock().take(),
                Err(_) => return Ok(YieldOutcome::Complete),
            }
        };

        let Some(work) = callable else { return Ok(YieldOutcome::Complete) };

        let result = match &work {
            NodeWork::Void(f) => catch_unwind(AssertUnwindSafe(|| {
                f();
                YieldOutcome::Complete
            })),
            NodeWork::Yieldable(f) => catch_unwind(AssertUnwindSafe(|| f())),
        };

        // Put the callable back so a yielded node can be re-invoked.
        {
            let dag = self.dag.read();
            if let Ok(record) = dag.get(handle) {
                *record.work.lock() = Some(work);
            }
        }

        result.map_err(|payload| WorkError::from_panic_payload(&*payload))
    }

    /// One-shot: transitions Executing->Completed, wakes the `pendingDependencies`
    /// of each child, and schedules any child that reaches zero with no
    /// failed parent.
    fn on_node_complete(self: &Arc<Self>, handle: NodeHandle) {
        let already = {
            let dag = self.dag.read();
            let Ok(record) = dag.get(handle) else { return };
            record.completion_processed.swap(true, Ordering::AcqRel)
        };
        if already {
            return;
        }

        let (children, contract_handle) = {
            let dag = self.dag.read();
            let Ok(record) = dag.get(handle) else { return };
            if !record.try_transition(NodeState::Executing, NodeState::Completed) {
                return;
            }
            self.publish(Event::NodeStateChanged(handle, NodeState::Executing, NodeState::Completed));
            let duration = (*record.started_at.lock()).map(|t| t.elapsed()).unwrap_or_default();
            self.publish(Event::NodeCompleted(handle, duration));
            let contract_handle = *record.handle.lock();
            (dag.children(handle).unwrap_or(&[]).to_vec(), contract_handle)
        };

        // Completing the contract can synchronously run the pool's
        // capacity callback, which re-enters this graph (submit ->
        // dag.read()); it must not run while `dag`'s guard above is held.
        if contract_handle.is_valid() {
            self.pool.complete(contract_handle);
        }

        self.counters.completed.fetch_add(1, Ordering::AcqRel);
        self.decrement_pending_and_wake();

        for child_index in children {
            self.resolve_dependency(handle, child_index);
        }
    }

    fn resolve_dependency(self: &Arc<Self>, parent: NodeHandle, child_index: u32) {
        let dag = self.dag.read();
        let Some(child) = dag.handles().find(|h| h.index() == child_index) else { return };
        let Ok(record) = dag.get(child) else { return };
        if record.state().is_terminal() {
            return;
        }
        let remaining = record.pending_dependencies.fetch_sub(1, Ordering::AcqRel) - 1;
        drop(dag);
        self.publish(Event::DependencyResolved(parent, child, remaining));
        if remaining == 0 && record_has_no_failed_parent(self, child) {
            self.try_promote_and_submit(child);
        }
    }

    /// One-shot: transitions the node to Failed (from whichever non-terminal
    /// state it is observed in — Executing for a thrown callable, Scheduled
    /// for a dropped deferred node, Yielded for reschedule exhaustion) and
    /// cascades cancellation to every transitive dependent.
    fn on_node_failed(self: &Arc<Self>, handle: NodeHandle, error: Arc<WorkError>) {
        self.fail_node(handle, error, FailKind::Failed);
    }

    /// Shared terminal-Failed path for both a genuinely failed node and one
    /// dropped for deferred-queue overflow. Both cascade to dependents the
    /// same way; only the counter bucket they land in differs, so a dropped
    /// node is never also counted as failed (invariant: completed + failed +
    /// cancelled + dropped + inProgress == totalNodes).
    fn fail_node(self: &Arc<Self>, handle: NodeHandle, error: Arc<WorkError>, kind: FailKind) {
        let (failed, contract_handle) = {
            let dag = self.dag.read();
            let Ok(record) = dag.get(handle) else { return };
            if record.completion_processed.swap(true, Ordering::AcqRel) {
                return;
            }
            let from = record.state();
            let failed = record.try_transition(from, NodeState::Failed);
            if failed {
                self.publish(Event::NodeStateChanged(handle, from, NodeState::Failed));
            }
            (failed, *record.handle.lock())
        };

        if !failed {
            return;
        }

        // Same reentrancy hazard as `on_node_complete`: complete the
        // contract only after the dag read guard above is dropped.
        if contract_handle.is_valid() {
            self.pool.complete(contract_handle);
        }

        self.publish(Event::NodeFailed(handle, error));
        match kind {
            FailKind::Failed => self.counters.failed.fetch_add(1, Ordering::AcqRel),
            FailKind::Dropped => self.counters.dropped.fetch_add(1, Ordering::AcqRel),
        };
        self.decrement_pending_and_wake();
        self.cancel_dependents(handle, handle);
    }

    /// DFS over children of `root`, marking each non-terminal descendant
    /// Cancelled and recursing into its own children.
    fn cancel_dependents(self: &Arc<Self>, root: NodeHandle, failed_parent: NodeHandle) {
        let children = {
            let dag = self.dag.read();
            dag.children(root).unwrap_or(&[]).to_vec()
        };

        for child_index in children {
            let (child_handle, should_recurse) = {
                let dag = self.dag.read();
                let Some(child) = dag.handles().find(|h| h.index() == child_index) else { continue };
                let Ok(record) = dag.get(child) else { continue };
                record.failed_parent_count.fetch_add(1, Ordering::AcqRel);
                if record.state().is_terminal() {
                    (child, false)
                } else {
                    (child, true)
                }
            };

            if should_recurse {
                self.cancel_node(child_handle, failed_parent);
                self.cancel_dependents(child_handle, failed_parent);
            }
        }
    }

    fn cancel_node(self: &Arc<Self>, handle: NodeHandle, failed_parent: NodeHandle) {
        let cancelled = {
            let dag = self.dag.read();
            let Ok(record) = dag.get(handle) else { return };
            if record.completion_processed.swap(true, Ordering::AcqRel) {
                return;
            }
            let from = record.state();
            let ok = record.try_transition(from, NodeState::Cancelled);
            (ok, from)
        };
        let (cancelled, from) = cancelled;
        if !cancelled {
            return;
        }
        self.publish(Event::NodeStateChanged(handle, from, NodeState::Cancelled));
        self.publish(Event::NodeCancelled(handle, failed_parent));
        self.counters.cancelled.fetch_add(1, Ordering::AcqRel);
        self.decrement_pending_and_wake();
    }

    /// Handles a Yield result: resubmits if under the reschedule cap,
    /// otherwise treats it as a failure.
    fn on_node_yielded(self: &Arc<Self>, handle: NodeHandle) {
        enum Outcome {
            Retry,
            Exhausted,
            Stale,
        }

        let outcome = {
            let dag = self.dag.read();
            let Ok(record) = dag.get(handle) else { return };
            if !record.try_transition(NodeState::Executing, NodeState::Yielded) {
                Outcome::Stale
            } else {
                self.publish(Event::NodeStateChanged(handle, NodeState::Executing, NodeState::Yielded));
                let count = record.reschedule_count.fetch_add(1, Ordering::AcqRel) + 1;
                let exhausted = record.max_reschedules.map(|max| count >= max).unwrap_or(false);
                if exhausted {
                    Outcome::Exhausted
                } else if record.try_transition(NodeState::Yielded, NodeState::Ready) {
                    Outcome::Retry
                } else {
                    Outcome::Stale
                }
            }
        };

        match outcome {
            Outcome::Stale => {}
            Outcome::Exhausted => {
                self.on_node_failed(handle, Arc::new(WorkError::from_panic_payload(&"maxReschedules exceeded")));
            }
            Outcome::Retry => {
                self.publish(Event::NodeStateChanged(handle, NodeState::Yielded, NodeState::Ready));
                self.publish(Event::NodeReady(handle));
                let promoted = {
                    let dag = self.dag.read();
                    dag.get(handle).map(|record| record.try_transition(NodeState::Ready, NodeState::Scheduled)).unwrap_or(false)
                };
                if promoted {
                    self.publish(Event::NodeStateChanged(handle, NodeState::Ready, NodeState::Scheduled));
                    self.publish(Event::NodeScheduled(handle));
                    self.submit(handle);
                }
            }
        }
    }

    fn decrement_pending_and_wake(&self) {
        let remaining = self.counters.pending_nodes.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            let _guard = self.wait_lock.lock();
            self.wait_cond.notify_all();
            self.publish(Event::GraphExecutionCompleted(self.stats_snapshot()));
        }
    }

    /// Blocks until every node reaches a terminal state.
    pub fn wait(&self) -> WaitSummary {
        let mut guard = self.wait_lock.lock();
        while self.counters.pending_nodes.load(Ordering::Acquire) > 0 {
            self.wait_cond.wait(&mut guard);
        }
        let completed = self.counters.completed.load(Ordering::Acquire);
        let failed = self.counters.failed.load(Ordering::Acquire);
        let dropped = self.counters.dropped.load(Ordering::Acquire);
        WaitSummary { completed, failed, dropped, all_completed: failed == 0 && dropped == 0 }
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    pub fn resume(self: &Arc<Self>) {
        self.suspended.store(false, Ordering::Release);
        self.process_deferred_nodes();
    }

    pub fn stats_snapshot(&self) -> GraphStatsSnapshot {
        let dag = self.dag.read();
        let mut snapshot = GraphStatsSnapshot {
            total: dag.len(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            ..Default::default()
        };
        for handle in dag.handles() {
            if let Ok(record) = dag.get(handle) {
                match record.state() {
                    NodeState::Pending => snapshot.pending += 1,
                    NodeState::Ready => snapshot.ready += 1,
                    NodeState::Scheduled => snapshot.scheduled += 1,
                    NodeState::Executing => snapshot.executing += 1,
                    NodeState::Yielded => snapshot.yielded += 1,
                    _ => {}
                }
            }
        }
        snapshot
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.lock().len()
    }
}

fn record_has_no_failed_parent(graph: &Arc<WorkGraph>, handle: NodeHandle) -> bool {
    let dag = graph.dag.read();
    dag.get(handle).map(|r| r.failed_parent_count.load(Ordering::Acquire) == 0).unwrap_or(false)
}

impl Drop for WorkGraph {
    fn drop(&mut self) {
        self.destroyed.store(true, Ordering::Release);
        if let Some(token) = self.capacity_token.lock().take() {
            self.pool.remove_capacity_callback(token);
        }
    }
}
