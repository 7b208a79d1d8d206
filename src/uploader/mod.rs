//! Leader-coordinated metadata uploader
//!
//! While this node leads the controller log, a session periodically bumps the
//! cluster manifest version, uploads the local controller snapshot when it is
//! newer than the one the manifest references, persists the manifest, and
//! reaps objects the new manifest no longer references.
//!
//! ## Checkpoints
//!
//! The object store offers no locking. Every externally visible side effect is
//! preceded by a [`ConsensusGuard`] check in the same cycle:
//!
//! ```text
//! bump version -> snapshot upload -> GUARD -> manifest put -> GUARD
//!              -> list orphans -> GUARD -> deletes
//! ```
//!
//! A deposed leader whose write is already in flight when the new leader is
//! elected can still land that write. That window is narrow and bounded; it is
//! not closed further.

pub mod bootstrap;
pub mod cycle;
pub mod dst;
pub mod reaper;
pub mod service;
pub mod session;
pub mod snapshot_uploader;

pub use bootstrap::sync_or_create;
pub use cycle::{UploadCycle, UploadOutcome};
pub use dst::{run_dst_batch, summarize_batch, UploaderDstConfig, UploaderDstHarness, UploaderDstResult};
pub use reaper::{compute_orphans, OrphanReaper, ReapStats};
pub use service::UploaderService;
pub use session::{sleep_abortable, SessionExit, SessionLoop, SessionReport, SessionState, SleepOutcome};
pub use snapshot_uploader::{SnapshotOutcome, SnapshotUploadError, SnapshotUploader};

use crate::clock::Clock;
use crate::config::{RetryConfig, UploadInterval, UploaderConfig};
use crate::consensus::{Consensus, ConsensusGuard};
use crate::manifest::ClusterUuid;
use crate::remote::{MetadataStore, RetryContext};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a session needs, shared across sessions of one node
pub struct UploaderContext<C: Consensus, M: MetadataStore, K: Clock> {
    pub cluster: ClusterUuid,
    pub consensus: Arc<C>,
    pub store: Arc<M>,
    pub clock: K,
    pub interval: UploadInterval,
    pub retry: RetryConfig,
    /// Seeds retry jitter; `None` draws from the OS
    pub jitter_seed: Option<u64>,
}

impl<C: Consensus, M: MetadataStore, K: Clock> UploaderContext<C, M, K> {
    pub fn new(
        cluster: ClusterUuid,
        consensus: Arc<C>,
        store: Arc<M>,
        clock: K,
        interval: UploadInterval,
        retry: RetryConfig,
    ) -> Self {
        UploaderContext {
            cluster,
            consensus,
            store,
            clock,
            interval,
            retry,
            jitter_seed: None,
        }
    }

    /// Build from a validated config
    pub fn from_config(
        config: &UploaderConfig,
        cluster: ClusterUuid,
        consensus: Arc<C>,
        store: Arc<M>,
        clock: K,
    ) -> Self {
        Self::new(
            cluster,
            consensus,
            store,
            clock,
            config.interval_binding(),
            config.retry.clone(),
        )
    }

    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    pub fn guard(&self) -> ConsensusGuard<C> {
        ConsensusGuard::new(self.consensus.clone())
    }

    /// Fresh retry budget bounded by the current upload interval
    pub fn retry_context(&self, abort: &CancellationToken, salt: u64) -> RetryContext {
        let ctx = RetryContext::new(self.interval.get(), &self.retry, abort.clone());
        match self.jitter_seed {
            Some(seed) => ctx.with_jitter_seed(seed.wrapping_add(salt)),
            None => ctx,
        }
    }
}
