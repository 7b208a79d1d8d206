//! Fault identifiers
//!
//! Each constant names one injection site. IDs are stable strings so that
//! statistics and per-fault overrides survive refactors.

/// Object store faults (injected by `SimulatedObjectStore`)
pub mod object_store {
    pub const PUT_FAIL: &str = "object_store.put_fail";
    /// Write lands but the caller sees an error
    pub const PUT_LOST_ACK: &str = "object_store.put_lost_ack";
    pub const GET_FAIL: &str = "object_store.get_fail";
    pub const DELETE_FAIL: &str = "object_store.delete_fail";
    pub const LIST_FAIL: &str = "object_store.list_fail";
    pub const TIMEOUT: &str = "object_store.timeout";
}

/// Consensus collaborator faults (injected by `SimulatedConsensus`)
pub mod consensus {
    /// Barrier round fails as if quorum was not reached
    pub const BARRIER_FAIL: &str = "consensus.barrier_fail";
    /// Leadership is lost while the barrier is in flight
    pub const LEADERSHIP_LOSS_DURING_BARRIER: &str = "consensus.leadership_loss_during_barrier";
}
