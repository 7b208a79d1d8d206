//! Single-node consensus that always leads
//!
//! Used by the `metadata-uploader` binary when the node runs standalone: the
//! term is fixed at startup and the barrier is trivially satisfied.

use super::{BarrierError, Consensus, Term};
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct StaticLeader {
    term: Term,
    snapshot_path: PathBuf,
    stepped_down: AtomicBool,
}

impl StaticLeader {
    pub fn new(term: Term, snapshot_path: PathBuf) -> Self {
        StaticLeader {
            term,
            snapshot_path,
            stepped_down: AtomicBool::new(false),
        }
    }

    /// Give up leadership; every later barrier fails
    pub fn step_down(&self) {
        self.stepped_down.store(true, Ordering::SeqCst);
    }
}

impl Consensus for StaticLeader {
    fn is_leader(&self) -> bool {
        !self.stepped_down.load(Ordering::SeqCst)
    }

    fn current_term(&self) -> Term {
        self.term
    }

    fn linearizable_barrier(&self) -> BoxFuture<'_, Result<(), BarrierError>> {
        Box::pin(async move {
            if self.is_leader() {
                Ok(())
            } else {
                Err(BarrierError::NotLeader)
            }
        })
    }

    fn local_snapshot_path(&self) -> PathBuf {
        self.snapshot_path.clone()
    }
}
