//! Remote metadata store
//!
//! Manifest and snapshot-blob operations on top of an
//! [`ObjectStore`](crate::storage::ObjectStore), with per-cycle retry budgets and
//! cooperative cancellation.

pub mod abort;
pub mod error;
pub mod metadata_store;
pub mod recording;
pub mod retry;

pub use abort::LazyAbortSource;
pub use error::StoreError;
pub use metadata_store::{MetadataStore, Remote, BLOB_CHUNK_SIZE};
pub use recording::{RecordedCall, RecordingStore};
pub use retry::RetryContext;
