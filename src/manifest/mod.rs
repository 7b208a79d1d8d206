//! Cluster metadata manifest: data model, wire codec, and remote key layout

pub mod cluster_manifest;
pub mod keys;
pub mod types;

pub use cluster_manifest::{ClusterManifest, ManifestError};
pub use types::{ClusterUuid, LogOffset};
