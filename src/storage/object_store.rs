//! Object Store Abstraction
//!
//! Trait-based abstraction over the bucket the uploader writes to. Each store
//! instance is bound to one bucket; keys are bucket-relative.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit tests and DST
//! - `LocalFsObjectStore`: For development and local testing
//! - `S3ObjectStore`: For production (feature-gated)

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Metadata for a stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key (path)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Creation timestamp (Unix ms)
    pub created_at_ms: u64,
}

/// Result of a list operation
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Objects matching the prefix
    pub objects: Vec<ObjectMeta>,
    /// Continuation token for pagination (if more results exist)
    pub continuation_token: Option<String>,
}

/// Object store abstraction trait
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object (create or overwrite)
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>>;

    /// Get an object's contents
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>>;

    /// Check if an object exists
    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>>;

    /// Delete an object; deleting a missing key succeeds
    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>>;

    /// List one page of objects with a prefix, sorted by key
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>>;
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// InMemoryObjectStore - For tests and DST
// ============================================================================

/// Default page size for in-memory listings
const DEFAULT_PAGE_SIZE: usize = 1000;

/// In-memory object store for unit tests and deterministic simulation
///
/// Clones share the same contents, so several simulated nodes can talk to
/// "the same bucket".
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    page_size: usize,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    created_at_ms: u64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        InMemoryObjectStore {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Store that pages listings after `page_size` keys (for pagination tests)
    pub fn with_page_size(page_size: usize) -> Self {
        InMemoryObjectStore {
            page_size: page_size.max(1),
            ..Self::new()
        }
    }

    /// Get the number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// All keys currently stored (for testing)
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Synchronous read that bypasses the async interface (for testing)
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).map(|o| o.data.clone())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let obj = StoredObject {
                data: data.to_vec(),
                created_at_ms: now_ms(),
            };
            self.data.write().insert(key.to_string(), obj);
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .map(|obj| obj.data.clone())
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key)))
        })
    }

    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move { Ok(self.data.read().contains_key(key)) })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.data.write().remove(key);
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>> {
        Box::pin(async move {
            let data = self.data.read();
            let mut objects: Vec<ObjectMeta> = data
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                // Token is the last key of the previous page
                .filter(|(k, _)| continuation_token.map_or(true, |t| k.as_str() > t))
                .take(self.page_size + 1)
                .map(|(k, v)| ObjectMeta {
                    key: k.clone(),
                    size_bytes: v.data.len() as u64,
                    created_at_ms: v.created_at_ms,
                })
                .collect();

            let continuation_token = if objects.len() > self.page_size {
                objects.truncate(self.page_size);
                objects.last().map(|o| o.key.clone())
            } else {
                None
            };

            Ok(ListResult {
                objects,
                continuation_token,
            })
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Local filesystem object store for development and testing
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    /// Store rooted at `base_path/bucket`
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    pub fn for_bucket(root: &Path, bucket: &str) -> Self {
        LocalFsObjectStore::new(root.join(bucket))
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    fn ensure_parent(path: &Path) -> IoResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }
}

fn walk_dir(dir: &Path, base: &Path, prefix: &str, objects: &mut Vec<ObjectMeta>) -> IoResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            walk_dir(&path, base, prefix, objects)?;
        } else if path.is_file() {
            let Ok(relative) = path.strip_prefix(base) else {
                continue;
            };
            let key = relative.to_string_lossy().replace('\\', "/");

            // In-flight temp files are not objects yet
            if key.contains(".tmp-") {
                continue;
            }

            if key.starts_with(prefix) {
                let metadata = std::fs::metadata(&path)?;
                objects.push(ObjectMeta {
                    key,
                    size_bytes: metadata.len(),
                    created_at_ms: metadata
                        .created()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or(0),
                });
            }
        }
    }
    Ok(())
}

impl ObjectStore for LocalFsObjectStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key);
            Self::ensure_parent(&path)?;

            // Write to temp then rename so readers never see a partial object
            let mut temp_name = path.as_os_str().to_owned();
            temp_name.push(format!(".tmp-{}", now_ms()));
            let temp_path = PathBuf::from(temp_name);

            tokio::fs::write(&temp_path, data).await?;
            if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e);
            }
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move { tokio::fs::read(self.full_path(key)).await })
    }

    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move { tokio::fs::try_exists(self.full_path(key)).await })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.full_path(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already deleted
                Err(e) => Err(e),
            }
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        _continuation_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>> {
        Box::pin(async move {
            let base = self.base_path.clone();
            let prefix = prefix.to_string();

            let objects = tokio::task::spawn_blocking(move || -> IoResult<Vec<ObjectMeta>> {
                let prefix_path = base.join(&prefix);
                let search_dir = if prefix_path.is_dir() {
                    prefix_path
                } else {
                    prefix_path.parent().unwrap_or(base.as_path()).to_path_buf()
                };
                if !search_dir.exists() {
                    return Ok(Vec::new());
                }

                let mut objects = Vec::new();
                walk_dir(&search_dir, &base, &prefix, &mut objects)?;
                objects.sort_by(|a, b| a.key.cmp(&b.key));
                Ok(objects)
            })
            .await
            .map_err(|e| IoError::new(ErrorKind::Other, format!("list task failed: {}", e)))??;

            Ok(ListResult {
                objects,
                continuation_token: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_put_get() {
        let store = InMemoryObjectStore::new();

        store.put("test/key1", b"hello world").await.unwrap();
        let data = store.get("test/key1").await.unwrap();

        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_inmemory_get_missing_is_not_found() {
        let store = InMemoryObjectStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_inmemory_delete() {
        let store = InMemoryObjectStore::new();

        store.put("test/key1", b"data").await.unwrap();
        assert!(store.exists("test/key1").await.unwrap());

        store.delete("test/key1").await.unwrap();
        assert!(!store.exists("test/key1").await.unwrap());

        // Deleting again is fine
        store.delete("test/key1").await.unwrap();
    }

    #[tokio::test]
    async fn test_inmemory_list_prefix() {
        let store = InMemoryObjectStore::new();

        store.put("cluster_metadata/a/1", b"data1").await.unwrap();
        store.put("cluster_metadata/a/2", b"data2").await.unwrap();
        store.put("cluster_metadata/b/1", b"data3").await.unwrap();

        let result = store.list("cluster_metadata/a/", None).await.unwrap();
        assert_eq!(result.objects.len(), 2);
        assert!(result.continuation_token.is_none());
        assert!(result
            .objects
            .iter()
            .all(|o| o.key.starts_with("cluster_metadata/a/")));
    }

    #[tokio::test]
    async fn test_inmemory_list_pagination() {
        let store = InMemoryObjectStore::with_page_size(2);
        for i in 0..5 {
            store.put(&format!("p/{}", i), b"x").await.unwrap();
        }
        store.put("q/0", b"x").await.unwrap();

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = store.list("p/", token.as_deref()).await.unwrap();
            pages += 1;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            match page.continuation_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(keys, vec!["p/0", "p/1", "p/2", "p/3", "p/4"]);
    }

    #[tokio::test]
    async fn test_inmemory_clones_share_contents() {
        let store = InMemoryObjectStore::new();
        let other = store.clone();
        store.put("k", b"v").await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), b"v");
        assert_eq!(other.keys(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_localfs_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::for_bucket(dir.path(), "bucket");

        store.put("a/b/key1.json", b"hello world").await.unwrap();
        assert_eq!(store.get("a/b/key1.json").await.unwrap(), b"hello world");
        assert!(store.exists("a/b/key1.json").await.unwrap());

        store.delete("a/b/key1.json").await.unwrap();
        assert!(!store.exists("a/b/key1.json").await.unwrap());
        store.delete("a/b/key1.json").await.unwrap();

        let err = store.get("a/b/key1.json").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_localfs_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());

        store
            .put("cluster_metadata/c/manifests/0/cluster_manifest.json", b"1")
            .await
            .unwrap();
        store
            .put("cluster_metadata/c/100/controller.snapshot", b"2")
            .await
            .unwrap();
        store
            .put("cluster_metadata/other/manifests/0/cluster_manifest.json", b"3")
            .await
            .unwrap();

        let result = store.list("cluster_metadata/c/", None).await.unwrap();
        let keys: Vec<_> = result.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "cluster_metadata/c/100/controller.snapshot",
                "cluster_metadata/c/manifests/0/cluster_manifest.json",
            ]
        );
    }

    #[tokio::test]
    async fn test_localfs_list_missing_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().join("empty"));
        let result = store.list("cluster_metadata/", None).await.unwrap();
        assert!(result.objects.is_empty());
    }
}
