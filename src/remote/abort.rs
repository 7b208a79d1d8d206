//! Lazy abort source
//!
//! A cheap, synchronous predicate consulted by long-running remote operations
//! before each attempt, between blob chunks, and periodically while an
//! attempt is in flight. It never issues a barrier; the full check lives in
//! `ConsensusGuard`.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// How often an in-flight attempt re-evaluates the predicate
pub const LAZY_ABORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

type AbortPredicate = dyn Fn() -> Option<String> + Send + Sync;

#[derive(Clone)]
pub struct LazyAbortSource {
    predicate: Arc<AbortPredicate>,
}

impl LazyAbortSource {
    /// `predicate` returns the abort reason, or `None` to continue
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        LazyAbortSource {
            predicate: Arc::new(predicate),
        }
    }

    pub fn never() -> Self {
        Self::new(|| None)
    }

    pub fn abort_reason(&self) -> Option<String> {
        (self.predicate)()
    }

    /// Resolve with the abort reason once the predicate trips
    pub async fn tripped(&self, poll: Duration) -> String {
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(reason) = self.abort_reason() {
                return reason;
            }
        }
    }
}

impl std::fmt::Debug for LazyAbortSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyAbortSource").finish_non_exhaustive()
    }
}
