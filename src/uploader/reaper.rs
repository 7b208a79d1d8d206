//! Orphan reaping
//!
//! After a manifest is persisted, anything under the cluster prefix that the
//! committed manifest supersedes is garbage:
//!
//! - manifests with a strictly lower version
//! - snapshots with a strictly lower offset than the referenced one
//!
//! Keys that do not parse, higher versions and higher offsets are left alone;
//! they may belong to a writer this node does not know about yet. Reaping is
//! best-effort: a failed delete is logged and picked up by the next cycle's
//! listing.

use crate::manifest::{keys, ClusterManifest};
use crate::remote::{MetadataStore, RetryContext, StoreError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub deleted: usize,
    pub failed: usize,
}

/// Keys in `listed` that `committed` supersedes
pub fn compute_orphans(committed: &ClusterManifest, listed: &[String]) -> Vec<String> {
    let cluster = &committed.cluster_uuid;
    listed
        .iter()
        .filter(|key| {
            if let Some(version) = keys::parse_manifest_version(cluster, key) {
                return committed.version.is_some_and(|committed| version < committed);
            }
            if let Some(offset) = keys::parse_snapshot_offset(cluster, key) {
                return offset < committed.snapshot_offset
                    && committed.snapshot_reference.as_deref() != Some(key.as_str());
            }
            false
        })
        .cloned()
        .collect()
}

pub struct OrphanReaper<'a, M: MetadataStore + ?Sized> {
    store: &'a M,
}

impl<'a, M: MetadataStore + ?Sized> OrphanReaper<'a, M> {
    pub fn new(store: &'a M) -> Self {
        OrphanReaper { store }
    }

    /// List the cluster prefix and compute what `committed` supersedes
    pub async fn list_orphans(
        &self,
        committed: &ClusterManifest,
        retry: &RetryContext,
    ) -> Result<Vec<String>, StoreError> {
        let prefix = keys::cluster_prefix(&committed.cluster_uuid);
        let listed = self.store.list_objects(&prefix, retry).await?;
        Ok(compute_orphans(committed, &listed))
    }

    /// Delete each orphan independently; failures are logged and skipped
    pub async fn delete_orphans(&self, orphans: &[String], retry: &RetryContext) -> ReapStats {
        let mut stats = ReapStats::default();
        for key in orphans {
            match self.store.delete_object(key, retry).await {
                Ok(()) => {
                    debug!(key = %key, "Deleted orphaned object");
                    stats.deleted += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete orphaned object");
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// List then delete, without an authority check in between
    pub async fn reap(
        &self,
        committed: &ClusterManifest,
        retry: &RetryContext,
    ) -> Result<ReapStats, StoreError> {
        let orphans = self.list_orphans(committed, retry).await?;
        Ok(self.delete_orphans(&orphans, retry).await)
    }
}
