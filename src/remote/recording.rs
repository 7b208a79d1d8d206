//! Call-recording metadata store
//!
//! Wraps any [`MetadataStore`] and records each call that reached it, in
//! order. Tests use it to assert "zero network calls" and "no deletes after
//! authority changed"; an optional hook runs after every successful call so
//! a test can change leadership at an exact point in the protocol.

use super::abort::LazyAbortSource;
use super::error::StoreError;
use super::metadata_store::MetadataStore;
use super::retry::RetryContext;
use crate::manifest::{ClusterManifest, ClusterUuid};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::AsyncRead;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    FetchHighest,
    UploadManifest { version: Option<u64> },
    UploadBlob { key: String },
    Delete { key: String },
    List { prefix: String },
}

type CallHook = Box<dyn Fn(&RecordedCall) + Send + Sync>;

pub struct RecordingStore<M: MetadataStore> {
    inner: M,
    calls: Mutex<Vec<RecordedCall>>,
    after_success: Option<CallHook>,
}

impl<M: MetadataStore> RecordingStore<M> {
    pub fn new(inner: M) -> Self {
        RecordingStore {
            inner,
            calls: Mutex::new(Vec::new()),
            after_success: None,
        }
    }

    /// Run `hook` after every call that returned `Ok`
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RecordedCall) + Send + Sync + 'static,
    {
        self.after_success = Some(Box::new(hook));
        self
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn manifest_uploads(&self) -> Vec<Option<u64>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::UploadManifest { version } => Some(*version),
                _ => None,
            })
            .collect()
    }

    pub fn blob_uploads(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, RecordedCall::UploadBlob { .. }))
            .count()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Delete { key } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    fn record<T>(&self, call: RecordedCall, result: &Result<T, StoreError>) {
        self.calls.lock().push(call.clone());
        if result.is_ok() {
            if let Some(hook) = &self.after_success {
                hook(&call);
            }
        }
    }
}

impl<M: MetadataStore> MetadataStore for RecordingStore<M> {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    fn fetch_highest_manifest<'a>(
        &'a self,
        cluster: &'a ClusterUuid,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<ClusterManifest, StoreError>> {
        Box::pin(async move {
            let result = self.inner.fetch_highest_manifest(cluster, retry).await;
            self.record(RecordedCall::FetchHighest, &result);
            result
        })
    }

    fn upload_manifest<'a>(
        &'a self,
        manifest: &'a ClusterManifest,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let result = self.inner.upload_manifest(manifest, retry).await;
            self.record(
                RecordedCall::UploadManifest {
                    version: manifest.version,
                },
                &result,
            );
            result
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
            let result = self.inner.upload_blob(key, reader, retry, lazy_abort).await;
            self.record(RecordedCall::UploadBlob { key: key.to_string() }, &result);
            result
        })
    }

    fn delete_object<'a>(
        &'a self,
        key: &'a str,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let result = self.inner.delete_object(key, retry).await;
            self.record(RecordedCall::Delete { key: key.to_string() }, &result);
            result
        })
    }

    fn list_objects<'a>(
        &'a self,
        prefix: &'a str,
        retry: &'a RetryContext,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            let result = self.inner.list_objects(prefix, retry).await;
            self.record(
                RecordedCall::List {
                    prefix: prefix.to_string(),
                },
                &result,
            );
            result
        })
    }
}
