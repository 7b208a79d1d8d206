//! Manifest bootstrap

use crate::manifest::{ClusterManifest, ClusterUuid};
use crate::remote::{MetadataStore, RetryContext, StoreError};
use tracing::info;

/// Download the highest manifest for `cluster`, or start a fresh lineage
///
/// `NotFound` yields an unversioned manifest with no snapshot; every other
/// error is returned unchanged.
pub async fn sync_or_create<M: MetadataStore + ?Sized>(
    store: &M,
    cluster: &ClusterUuid,
    retry: &RetryContext,
) -> Result<ClusterManifest, StoreError> {
    match store.fetch_highest_manifest(cluster, retry).await {
        Ok(manifest) => {
            info!(
                cluster = %cluster,
                version = ?manifest.version,
                snapshot_offset = %manifest.snapshot_offset,
                "Synced cluster manifest"
            );
            Ok(manifest)
        }
        Err(StoreError::NotFound(_)) => {
            info!(cluster = %cluster, bucket = %store.bucket(), "No manifest found, creating one");
            Ok(ClusterManifest::new(cluster.clone()))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::remote::Remote;
    use crate::storage::{InMemoryObjectStore, ObjectStore, SimulatedObjectStore, SimulatedStoreConfig};
    use crate::io::SimulatedRng;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn cluster() -> ClusterUuid {
        ClusterUuid::parse("c1").unwrap()
    }

    fn retry() -> RetryContext {
        RetryContext::new(Duration::from_millis(50), &RetryConfig::test(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_empty_store_creates_unversioned() {
        let remote = Remote::new(InMemoryObjectStore::new(), "bucket");
        let m = sync_or_create(&remote, &cluster(), &retry()).await.unwrap();
        assert_eq!(m.cluster_uuid, cluster());
        assert_eq!(m.version, None);
        assert!(m.snapshot_reference.is_none());
        assert!(remote.store().is_empty());
    }

    #[tokio::test]
    async fn test_populated_store_returns_highest() {
        let remote = Remote::new(InMemoryObjectStore::new(), "bucket");
        let ctx = retry();
        let mut m = ClusterManifest::new(cluster());
        for _ in 0..4 {
            m.advance_version();
            remote.upload_manifest(&m, &ctx).await.unwrap();
        }
        let synced = sync_or_create(&remote, &cluster(), &ctx).await.unwrap();
        assert_eq!(synced.version, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_pass_through() {
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedRng::new(3),
            SimulatedStoreConfig {
                list_fail_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );
        store.inner().put("unused", b"x").await.unwrap();
        let remote = Remote::new(store, "bucket");

        let err = sync_or_create(&remote, &cluster(), &retry()).await.unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded { op: "list", .. }));
    }
}
