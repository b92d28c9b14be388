//! Lock-free work-contract pool, signal tree, pluggable scheduler, and
//! dependency-graph orchestrator.
//!
//! The four pieces compose bottom-up:
//!
//! - [`signal_tree`] — a fixed-capacity lock-free bitmap index with O(log n)
//!   biased selection. Backs the pool's two ready-sets.
//! - [`contract_pool`] — a capacity-bounded arena of work slots with
//!   generation-validated handles and an atomic lifecycle state machine.
//! - [`scheduler`] and [`worker_service`] — a pluggable strategy for picking
//!   which registered pool a worker drains next, and the thread pool that
//!   runs it.
//! - [`dag`] and [`work_graph`] — a dependency graph layered on top of a
//!   pool, with failure cascade, bounded yield/reschedule, and an optional
//!   event stream.
//!
//! None of the hot paths (signal set/select/clear, contract
//! create/schedule/select/complete) take a blocking lock; cold paths
//! (registration, graph topology mutation, teardown) use `parking_lot`
//! locks freely.

pub mod contract_pool;
pub mod dag;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod signal_tree;
pub mod work_graph;
pub mod worker_service;

/// Commonly paired imports for building a worker-backed work graph.
pub mod prelude {
    pub use crate::contract_pool::{ContractHandle, ContractPool, ExecType};
    pub use crate::error::{GraphError, PoolConfigError};
    pub use crate::events::{Event, EventBus, Publisher, WaitSummary};
    pub use crate::scheduler::{
        AdaptiveRankingStrategy, DirectStrategy, RandomStrategy, RoundRobinStrategy, SchedulerStrategy,
        SpinningDirectStrategy,
    };
    pub use crate::signal_tree::SignalTree;
    pub use crate::work_graph::{NodeState, WorkGraph, WorkGraphBuilder, WorkGraphConfig, YieldOutcome};
    pub use crate::worker_service::WorkerService;
}
