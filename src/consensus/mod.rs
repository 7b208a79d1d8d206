//! Consensus collaborator interface
//!
//! The uploader never drives consensus; it reads leadership and term, asks
//! for a linearizable barrier, and opens the local controller snapshot.
//! [`ConsensusGuard`] folds the first three into one authority predicate.

pub mod guard;
pub mod simulated;
pub mod snapshot;
pub mod static_leader;

pub use guard::ConsensusGuard;
pub use simulated::{SimulatedCluster, SimulatedConsensus, SimulatedConsensusConfig};
pub use snapshot::{LocalSnapshot, SnapshotError, SnapshotHeader};
pub use static_leader::StaticLeader;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Consensus epoch; totally ordered, owned by the consensus layer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Term(pub u64);

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a linearizable barrier did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierError {
    /// This node is not (or no longer) the leader
    NotLeader,
    /// Quorum did not respond in time
    Timeout,
    /// Consensus is shutting down
    Shutdown,
}

impl std::fmt::Display for BarrierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BarrierError::NotLeader => write!(f, "not leader"),
            BarrierError::Timeout => write!(f, "barrier timed out"),
            BarrierError::Shutdown => write!(f, "consensus shutting down"),
        }
    }
}

impl std::error::Error for BarrierError {}

/// Leadership, term and barrier primitives plus local snapshot access
pub trait Consensus: Send + Sync + 'static {
    /// Local view; may lag the committed state until a barrier completes
    fn is_leader(&self) -> bool;

    fn current_term(&self) -> Term;

    /// Synchronize the local view with the latest committed state
    fn linearizable_barrier(&self) -> BoxFuture<'_, Result<(), BarrierError>>;

    fn local_snapshot_path(&self) -> PathBuf;

    /// Open the local snapshot, if one exists
    fn open_local_snapshot(&self) -> BoxFuture<'_, Result<Option<LocalSnapshot>, SnapshotError>> {
        Box::pin(async move { LocalSnapshot::open(&self.local_snapshot_path()).await })
    }
}
