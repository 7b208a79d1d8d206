//! ConsensusGuard
//!
//! The object store has no locks, so this check is the only thing standing
//! between two nodes writing conflicting manifest state. It must run right
//! before every externally visible write.

use super::{Consensus, Term};
use crate::remote::LazyAbortSource;
use std::sync::Arc;
use tracing::debug;

pub struct ConsensusGuard<C: Consensus> {
    consensus: Arc<C>,
}

impl<C: Consensus> Clone for ConsensusGuard<C> {
    fn clone(&self) -> Self {
        ConsensusGuard {
            consensus: self.consensus.clone(),
        }
    }
}

impl<C: Consensus> ConsensusGuard<C> {
    pub fn new(consensus: Arc<C>) -> Self {
        ConsensusGuard { consensus }
    }

    pub fn consensus(&self) -> &Arc<C> {
        &self.consensus
    }

    fn local_view_stale(&self, expected_term: Term) -> bool {
        !self.consensus.is_leader() || self.consensus.current_term() != expected_term
    }

    /// Local check, then a barrier, then the local check again
    pub async fn has_authority_changed(&self, expected_term: Term) -> bool {
        if self.local_view_stale(expected_term) {
            debug!(
                expected_term = %expected_term,
                current_term = %self.consensus.current_term(),
                is_leader = self.consensus.is_leader(),
                "Authority changed (local view)"
            );
            return true;
        }

        if let Err(e) = self.consensus.linearizable_barrier().await {
            debug!(expected_term = %expected_term, error = %e, "Authority changed (barrier failed)");
            return true;
        }

        if self.local_view_stale(expected_term) {
            debug!(
                expected_term = %expected_term,
                current_term = %self.consensus.current_term(),
                "Authority changed (after barrier)"
            );
            return true;
        }
        false
    }

    /// Barrier-free predicate for long-running sub-operations
    pub fn lazy_abort_source(&self, synced_term: Term) -> LazyAbortSource {
        let consensus = self.consensus.clone();
        LazyAbortSource::new(move || {
            let current = consensus.current_term();
            if !consensus.is_leader() || current != synced_term {
                Some(format!(
                    "lost leadership or term changed: synced term {} vs current term {}",
                    synced_term, current
                ))
            } else {
                None
            }
        })
    }
}
