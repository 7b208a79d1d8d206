//! Controller snapshot upload
//!
//! Uploads the local controller snapshot when it covers a higher offset than
//! the manifest already references, then points the in-memory manifest at
//! it. Persisting that change is the enclosing cycle's job.

use crate::consensus::{Consensus, SnapshotError};
use crate::manifest::{keys, ClusterManifest, LogOffset};
use crate::remote::{LazyAbortSource, MetadataStore, RetryContext, StoreError};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// No local snapshot file
    NoSnapshot,
    /// The manifest already covers the local snapshot; no network call made
    AlreadyCovered { local: LogOffset, remote: LogOffset },
    Uploaded { offset: LogOffset, bytes: u64 },
}

#[derive(Debug)]
pub enum SnapshotUploadError {
    /// Reading the local snapshot failed
    Local(SnapshotError),
    /// Uploading the blob failed
    Remote(StoreError),
}

impl std::fmt::Display for SnapshotUploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotUploadError::Local(e) => write!(f, "local snapshot: {}", e),
            SnapshotUploadError::Remote(e) => write!(f, "snapshot upload: {}", e),
        }
    }
}

impl std::error::Error for SnapshotUploadError {}

impl From<SnapshotError> for SnapshotUploadError {
    fn from(e: SnapshotError) -> Self {
        SnapshotUploadError::Local(e)
    }
}

impl From<StoreError> for SnapshotUploadError {
    fn from(e: StoreError) -> Self {
        SnapshotUploadError::Remote(e)
    }
}

pub struct SnapshotUploader<'a, C: Consensus, M: MetadataStore + ?Sized> {
    consensus: &'a C,
    store: &'a M,
}

impl<'a, C: Consensus, M: MetadataStore + ?Sized> SnapshotUploader<'a, C, M> {
    pub fn new(consensus: &'a C, store: &'a M) -> Self {
        SnapshotUploader { consensus, store }
    }

    /// Upload the local snapshot if the manifest does not already cover it
    ///
    /// # Panics
    /// If the local snapshot header carries the "no offset" sentinel. A
    /// snapshot always covers at least one entry; anything else is a
    /// data-integrity bug, not an operational failure.
    pub async fn maybe_upload(
        &self,
        manifest: &mut ClusterManifest,
        retry: &RetryContext,
        lazy_abort: &LazyAbortSource,
    ) -> Result<SnapshotOutcome, SnapshotUploadError> {
        // The file handle is owned by `snapshot` and closed on every return
        let Some(mut snapshot) = self.consensus.open_local_snapshot().await? else {
            debug!(path = %self.consensus.local_snapshot_path().display(), "No local controller snapshot");
            return Ok(SnapshotOutcome::NoSnapshot);
        };

        let local = snapshot.last_included_offset();
        assert!(
            local.is_set(),
            "local controller snapshot {} has invalid last included offset {}",
            snapshot.path().display(),
            local
        );

        if manifest.snapshot_offset >= local {
            debug!(
                local_offset = %local,
                manifest_offset = %manifest.snapshot_offset,
                "Manifest already covers local snapshot"
            );
            return Ok(SnapshotOutcome::AlreadyCovered {
                local,
                remote: manifest.snapshot_offset,
            });
        }

        let key = keys::snapshot_key(&manifest.cluster_uuid, local);
        let reader = snapshot.reader().await?;
        let bytes = self.store.upload_blob(&key, reader, retry, lazy_abort).await?;

        info!(
            key = %key,
            offset = %local,
            previous_offset = %manifest.snapshot_offset,
            bytes,
            "Uploaded controller snapshot"
        );
        manifest.record_snapshot(key, local);
        Ok(SnapshotOutcome::Uploaded {
            offset: local,
            bytes,
        })
    }
}
