// contract-kernel: cold-path error types.
//
// Hot paths (SignalTree, ContractPool scheduling/selection) never raise
// these — they return status enums per the propagation policy. These types
// cover the handful of genuinely fallible construction- and graph-topology
// calls.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolConfigError {
    #[error("pool capacity must be greater than zero")]
    ZeroCapacity,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("adding this edge would create a self-loop or a cycle")]
    CycleOrSelfLoop,
    #[error("execute() has already been called on this graph")]
    AlreadyStarted,
    #[error("nodes remain pending but no root could be scheduled (cycle or orphaned dependency)")]
    CycleOrOrphan,
    #[error("node handle does not belong to this graph")]
    NodeNotFound,
}
