//! Object storage backends
//!
//! The uploader talks to a single bucket through the [`ObjectStore`] trait.
//! [`SimulatedObjectStore`] wraps any backend with seeded fault injection.

pub mod object_store;
#[cfg(feature = "s3")]
pub mod s3_store;
pub mod simulated_store;

pub use object_store::{InMemoryObjectStore, ListResult, LocalFsObjectStore, ObjectMeta, ObjectStore};
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;
pub use simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};
