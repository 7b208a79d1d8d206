//! Metadata store: manifest and snapshot operations over an object store
//!
//! [`Remote`] is bound to one bucket. Every operation runs under the caller's
//! [`RetryContext`]; blob uploads additionally consult a [`LazyAbortSource`]
//! between chunks so a long transfer stops promptly once authority is lost.

use super::abort::LazyAbortSource;
use super::error::StoreError;
use super::retry::RetryContext;
use crate::manifest::keys;
use crate::manifest::{ClusterManifest, ClusterUuid};
use crate::storage::ObjectStore;
use futures::future::BoxFuture;
use std::io::{Error as IoError, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

/// Read size for streaming a local blob into memory
pub const BLOB_CHUNK_SIZE: usize = 1024 * 1024;

/// Remote operations consumed by the uploader
pub trait MetadataStore: Send + Sync + 'static {
    /// Name of the bucket this store writes to
    fn bucket(&self) -> &str;

    /// Highest-versioned manifest for `cluster`; `NotFound` when none exists
    fn fetch_highest_manifest<'a>(
        &'a self,
        cluster: &'a ClusterUuid,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<ClusterManifest, StoreError>>;

    /// Persist `manifest` at its version-derived key
    fn upload_manifest<'a>(
        &'a self,
        manifest: &'a ClusterManifest,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Stream `reader` to `key`, checking `lazy_abort` between chunks and attempts
    fn upload_blob<'a>(
        &'a self,
        key: &'a str,
        reader: &'a mut (dyn AsyncRead + Unpin + Send),
        retry: &'a RetryContext,
        lazy_abort: &'a LazyAbortSource,
    ) -> BoxFuture<'a, Result<u64, StoreError>>;

    /// Delete one object; deleting a missing key succeeds
    fn delete_object<'a>(
        &'a self,
        key: &'a str,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Every key under `prefix`, sorted
    fn list_objects<'a>(
        &'a self,
        prefix: &'a str,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>>;
}

/// [`MetadataStore`] over any [`ObjectStore`]
pub struct Remote<S: ObjectStore> {
    store: S,
    bucket: String,
}

impl<S: ObjectStore> Remote<S> {
    pub fn new(store: S, bucket: impl Into<String>) -> Self {
        Remote {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ObjectStore> MetadataStore for Remote<S> {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn fetch_highest_manifest<'a>(
        &'a self,
        cluster: &'a ClusterUuid,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<ClusterManifest, StoreError>> {
        Box::pin(async move {
            let prefix = keys::manifests_prefix(cluster);
            let listed = self.list_objects(&prefix, retry).await?;

            let highest = listed
                .iter()
                .filter_map(|key| keys::parse_manifest_version(cluster, key).map(|v| (v, key)))
                .max_by_key(|(v, _)| *v);

            let Some((version, key)) = highest else {
                return Err(StoreError::NotFound(format!(
                    "no manifest for cluster {} in bucket {}",
                    cluster, self.bucket
                )));
            };

            let data = retry
                .run("get_manifest", None, || self.store.get(key))
                .await
                .map_err(|e| match e {
                    // Listed but gone: never treat as an empty lineage
                    StoreError::NotFound(msg) => StoreError::Io(IoError::new(
                        ErrorKind::Other,
                        format!("manifest {} vanished after listing: {}", key, msg),
                    )),
                    other => other,
                })?;

            let manifest = ClusterManifest::decode_for(cluster, &data)?;
            if manifest.version != Some(version) {
                return Err(StoreError::Io(IoError::new(
                    ErrorKind::InvalidData,
                    format!(
                        "manifest at {} carries version {:?}, expected {}",
                        key, manifest.version, version
                    ),
                )));
            }

            debug!(cluster = %cluster, version, bucket = %self.bucket, "Downloaded manifest");
            Ok(manifest)
        })
    }

    fn upload_manifest<'a>(
        &'a self,
        manifest: &'a ClusterManifest,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let key = manifest.key()?;
            let data = manifest.to_json()?;
            retry
                .run("put_manifest", None, || self.store.put(&key, &data))
                .await?;
            info!(
                key = %key,
                version = ?manifest.version,
                bucket = %self.bucket,
                "Uploaded manifest"
            );
            Ok(())
        })
    }

    fn upload_blob<'a>(
        &'a self,
        key: &'a str,
        reader: &'a mut (dyn AsyncRead + Unpin + Send),
        retry: &'a RetryContext,
        lazy_abort: &'a LazyAbortSource,
    ) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut data = Vec::new();
            let mut chunk = vec![0u8; BLOB_CHUNK_SIZE];
            loop {
                if let Some(reason) = lazy_abort.abort_reason() {
                    return Err(StoreError::Cancelled(reason));
                }
                if retry.abort_token().is_cancelled() {
                    return Err(StoreError::Cancelled(format!(
                        "upload of {} aborted by shutdown",
                        key
                    )));
                }
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&chunk[..n]);
            }

            retry
                .run("put_blob", Some(lazy_abort), || self.store.put(key, &data))
                .await?;
            info!(key = %key, bytes = data.len(), bucket = %self.bucket, "Uploaded blob");
            Ok(data.len() as u64)
        })
    }

    fn delete_object<'a>(
        &'a self,
        key: &'a str,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            retry
                .run("delete", None, || self.store.delete(key))
                .await
        })
    }

    fn list_objects<'a>(
        &'a self,
        prefix: &'a str,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            let mut keys = Vec::new();
            let mut token: Option<String> = None;
            loop {
                let page = retry
                    .run("list", None, || self.store.list(prefix, token.as_deref()))
                    .await?;
                keys.extend(page.objects.into_iter().map(|o| o.key));
                match page.continuation_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::manifest::LogOffset;
    use crate::storage::InMemoryObjectStore;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn cluster() -> ClusterUuid {
        ClusterUuid::parse("c1").unwrap()
    }

    fn retry() -> RetryContext {
        RetryContext::new(Duration::from_secs(5), &RetryConfig::test(), CancellationToken::new())
    }

    fn manifest_at(version: u64) -> ClusterManifest {
        let mut m = ClusterManifest::new(cluster());
        m.version = Some(version);
        m
    }

    #[tokio::test]
    async fn test_fetch_highest_on_empty_store_is_not_found() {
        let remote = Remote::new(InMemoryObjectStore::new(), "bucket");
        let err = remote
            .fetch_highest_manifest(&cluster(), &retry())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fetch_highest_picks_numeric_max() {
        let remote = Remote::new(InMemoryObjectStore::new(), "bucket");
        let ctx = retry();
        for v in [0, 2, 10, 9] {
            remote.upload_manifest(&manifest_at(v), &ctx).await.unwrap();
        }
        // Unparseable neighbour is ignored
        remote
            .store()
            .put("cluster_metadata/c1/manifests/garbage/cluster_manifest.json", b"{}")
            .await
            .unwrap();

        let m = remote.fetch_highest_manifest(&cluster(), &ctx).await.unwrap();
        assert_eq!(m.version, Some(10));
    }

    #[tokio::test]
    async fn test_fetch_highest_pages_through_listing() {
        let remote = Remote::new(InMemoryObjectStore::with_page_size(2), "bucket");
        let ctx = retry();
        for v in 0..7 {
            remote.upload_manifest(&manifest_at(v), &ctx).await.unwrap();
        }
        let m = remote.fetch_highest_manifest(&cluster(), &ctx).await.unwrap();
        assert_eq!(m.version, Some(6));
    }

    #[tokio::test]
    async fn test_fetch_rejects_foreign_manifest() {
        let remote = Remote::new(InMemoryObjectStore::new(), "bucket");
        let foreign = ClusterManifest {
            version: Some(0),
            ..ClusterManifest::new(ClusterUuid::parse("other").unwrap())
        };
        remote
            .store()
            .put(&keys::manifest_key(&cluster(), 0), &foreign.to_json().unwrap())
            .await
            .unwrap();

        let err = remote
            .fetch_highest_manifest(&cluster(), &retry())
            .await
            .unwrap_err();
        match err {
            StoreError::Io(e) => assert_eq!(e.kind(), ErrorKind::InvalidData),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_unversioned_manifest_fails() {
        let remote = Remote::new(InMemoryObjectStore::new(), "bucket");
        let err = remote
            .upload_manifest(&ClusterManifest::new(cluster()), &retry())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(remote.store().is_empty());
    }

    #[tokio::test]
    async fn test_upload_blob_streams_reader() {
        let remote = Remote::new(InMemoryObjectStore::new(), "bucket");
        let payload = vec![7u8; BLOB_CHUNK_SIZE + 17];
        let mut reader: &[u8] = &payload;
        let key = keys::snapshot_key(&cluster(), LogOffset(100));

        let n = remote
            .upload_blob(&key, &mut reader, &retry(), &LazyAbortSource::never())
            .await
            .unwrap();

        assert_eq!(n, payload.len() as u64);
        assert_eq!(remote.store().get(&key).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_upload_blob_stops_on_lazy_abort() {
        let remote = Remote::new(InMemoryObjectStore::new(), "bucket");
        let payload = vec![1u8; 64];
        let mut reader: &[u8] = &payload;
        let lazy = LazyAbortSource::new(|| Some("lost leadership".to_string()));

        let err = remote
            .upload_blob("k", &mut reader, &retry(), &lazy)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(remote.store().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let remote = Remote::new(InMemoryObjectStore::new(), "bucket");
        let ctx = retry();
        remote.upload_manifest(&manifest_at(0), &ctx).await.unwrap();
        remote.upload_manifest(&manifest_at(1), &ctx).await.unwrap();

        let prefix = keys::cluster_prefix(&cluster());
        let listed = remote.list_objects(&prefix, &ctx).await.unwrap();
        assert_eq!(listed.len(), 2);

        remote.delete_object(&listed[0], &ctx).await.unwrap();
        remote.delete_object(&listed[0], &ctx).await.unwrap();
        assert_eq!(remote.list_objects(&prefix, &ctx).await.unwrap().len(), 1);
    }
}
