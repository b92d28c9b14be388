// contract-kernel: the graph's optional event stream. Treated, per the
// surrounding design, as an opaque publish-subscribe collaborator — no
// generic service locator or reflection sits behind it, just a thread-safe
// fan-out with exception-swallowing handlers.

use crate::dag::NodeHandle;
use crate::work_graph::NodeState;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Opaque capture of a user callable's panic, carried on [`Event::NodeFailed`].
#[derive(Debug, Clone)]
pub struct WorkError {
    message: String,
}

impl WorkError {
    pub fn from_panic_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for WorkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkError {}

/// Point-in-time counters over a [`crate::work_graph::WorkGraph`], used both
/// as the `wait()` return value's backing data and as `GraphStats` payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStatsSnapshot {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub scheduled: usize,
    pub executing: usize,
    pub yielded: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub dropped: usize,
}

impl GraphStatsSnapshot {
    pub fn in_progress(&self) -> usize {
        self.pending + self.ready + self.scheduled + self.executing + self.yielded
    }

    pub fn all_completed(&self) -> bool {
        self.in_progress() == 0 && self.failed == 0 && self.dropped == 0
    }
}

/// Returned by [`crate::work_graph::WorkGraph::wait`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitSummary {
    pub completed: usize,
    pub failed: usize,
    pub dropped: usize,
    pub all_completed: bool,
}

/// A timestamped, strongly-typed value published by the graph. Timestamps
/// are left to the subscriber — handlers run synchronously on the thread
/// that caused the transition, so `Instant::now()` at the handler is exact.
#[derive(Debug, Clone)]
pub enum Event {
    NodeAdded(NodeHandle),
    DependencyAdded(NodeHandle, NodeHandle),
    NodeStateChanged(NodeHandle, NodeState, NodeState),
    NodeReady(NodeHandle),
    NodeScheduled(NodeHandle),
    NodeDeferred(NodeHandle, usize),
    NodeExecuting(NodeHandle, usize),
    NodeCompleted(NodeHandle, Duration),
    NodeFailed(NodeHandle, Arc<WorkError>),
    NodeCancelled(NodeHandle, NodeHandle),
    DependencyResolved(NodeHandle, NodeHandle, u32),
    GraphExecutionStarted(usize, usize),
    GraphExecutionCompleted(GraphStatsSnapshot),
    GraphStats(GraphStatsSnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Type-erased publish-subscribe sink. Implementations must be safe to call
/// from any worker thread and must never let a handler panic escape
/// `publish`.
pub trait Publisher: Send + Sync {
    fn subscribe(&self, handler: Box<dyn Fn(&Event) + Send + Sync>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
    fn publish(&self, event: &Event);
    fn clear(&self);
}

/// Default [`Publisher`]: a `Vec` of handlers behind a reader/writer lock.
/// Publication takes the shared lock and invokes each handler in
/// registration order, catching and logging (not propagating) any panic.
pub struct EventBus {
    handlers: RwLock<Vec<(SubscriptionId, Box<dyn Fn(&Event) + Send + Sync>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self { handlers: RwLock::new(Vec::new()), next_id: AtomicU64::new(1) }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for EventBus {
    fn subscribe(&self, handler: Box<dyn Fn(&Event) + Send + Sync>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.write().retain(|(existing, _)| *existing != id);
    }

    fn publish(&self, event: &Event) {
        for (_, handler) in self.handlers.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("event handler panicked; swallowed by EventBus");
            }
        }
    }

    fn clear(&self) {
        self.handlers.write().clear();
    }
}

/// Publisher that discards everything. Used when a graph is built with
/// `enable_events = false` so the hot path still has a uniform sink to call
/// without branching on "do we have a publisher".
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn subscribe(&self, _handler: Box<dyn Fn(&Event) + Send + Sync>) -> SubscriptionId {
        SubscriptionId(0)
    }

    fn unsubscribe(&self, _id: SubscriptionId) {}

    fn publish(&self, _event: &Event) {}

    fn clear(&self) {}
}
