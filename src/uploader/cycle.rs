//! One manifest-version transaction
//!
//! Each step can end the cycle early. Nothing is rolled back: a version that
//! was bumped but never persisted is simply skipped by the next cycle.

use super::reaper::OrphanReaper;
use super::snapshot_uploader::SnapshotUploader;
use super::UploaderContext;
use crate::clock::Clock;
use crate::consensus::{Consensus, Term};
use crate::manifest::ClusterManifest;
use crate::remote::{MetadataStore, RetryContext};
use tracing::{debug, info, warn};

/// Result of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Success,
    /// Transient failure; the next scheduled cycle retries from scratch
    UploadFailed,
    /// Leadership or term moved on; the session must stop
    AuthorityChanged,
}

pub struct UploadCycle<'a, C: Consensus, M: MetadataStore, K: Clock> {
    ctx: &'a UploaderContext<C, M, K>,
}

impl<'a, C: Consensus, M: MetadataStore, K: Clock> UploadCycle<'a, C, M, K> {
    pub fn new(ctx: &'a UploaderContext<C, M, K>) -> Self {
        UploadCycle { ctx }
    }

    /// Bump, upload snapshot, check, persist, check, reap
    pub async fn run(
        &self,
        manifest: &mut ClusterManifest,
        term: Term,
        retry: &RetryContext,
    ) -> UploadOutcome {
        let guard = self.ctx.guard();
        let store = &*self.ctx.store;
        let cluster = &self.ctx.cluster;

        let version = manifest.advance_version();
        let lazy_abort = guard.lazy_abort_source(term);
        debug!(cluster = %cluster, term = %term, version, "Starting upload cycle");

        let snapshot = SnapshotUploader::new(&*self.ctx.consensus, store)
            .maybe_upload(manifest, retry, &lazy_abort)
            .await;
        if let Err(e) = snapshot {
            warn!(
                cluster = %cluster,
                term = %term,
                version,
                phase = "snapshot_upload",
                error = %e,
                "Failed to upload controller snapshot"
            );
            return UploadOutcome::UploadFailed;
        }

        if guard.has_authority_changed(term).await {
            info!(cluster = %cluster, term = %term, version, "Authority changed before manifest upload");
            return UploadOutcome::AuthorityChanged;
        }

        manifest.stamp(self.ctx.clock.now());
        if let Err(e) = store.upload_manifest(manifest, retry).await {
            warn!(
                cluster = %cluster,
                term = %term,
                version,
                phase = "manifest_upload",
                error = %e,
                "Failed to upload cluster manifest"
            );
            return UploadOutcome::UploadFailed;
        }

        if guard.has_authority_changed(term).await {
            info!(cluster = %cluster, term = %term, version, "Authority changed after manifest upload, skipping reap");
            return UploadOutcome::AuthorityChanged;
        }

        let reaper = OrphanReaper::new(store);
        let orphans = match reaper.list_orphans(manifest, retry).await {
            Ok(orphans) => orphans,
            Err(e) => {
                warn!(
                    cluster = %cluster,
                    term = %term,
                    version,
                    phase = "reap",
                    error = %e,
                    "Failed to list orphaned objects"
                );
                return UploadOutcome::Success;
            }
        };

        if !orphans.is_empty() {
            if guard.has_authority_changed(term).await {
                info!(cluster = %cluster, term = %term, version, "Authority changed before reap");
                return UploadOutcome::AuthorityChanged;
            }
            let stats = reaper.delete_orphans(&orphans, retry).await;
            debug!(
                cluster = %cluster,
                term = %term,
                version,
                deleted = stats.deleted,
                failed = stats.failed,
                "Reaped orphaned objects"
            );
        }

        info!(
            cluster = %cluster,
            term = %term,
            version,
            snapshot_offset = %manifest.snapshot_offset,
            "Upload cycle complete"
        );
        UploadOutcome::Success
    }
}
