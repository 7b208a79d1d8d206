//! Remote key layout
//!
//! ```text
//! cluster_metadata/{uuid}/manifests/{version}/cluster_manifest.json
//! cluster_metadata/{uuid}/{offset}/controller.snapshot
//! ```
//!
//! Every object for a cluster lives under `cluster_metadata/{uuid}/`, so one
//! prefix listing finds all reaping candidates.

use super::types::{ClusterUuid, LogOffset};

pub const CLUSTER_METADATA_ROOT: &str = "cluster_metadata";
pub const MANIFEST_FILE_NAME: &str = "cluster_manifest.json";
pub const SNAPSHOT_FILE_NAME: &str = "controller.snapshot";

/// Versions travel as int64 on the wire
pub const MAX_MANIFEST_VERSION: u64 = i64::MAX as u64;

/// `cluster_metadata/{uuid}/`
pub fn cluster_prefix(uuid: &ClusterUuid) -> String {
    format!("{}/{}/", CLUSTER_METADATA_ROOT, uuid)
}

/// `cluster_metadata/{uuid}/manifests/`
pub fn manifests_prefix(uuid: &ClusterUuid) -> String {
    format!("{}manifests/", cluster_prefix(uuid))
}

pub fn manifest_key(uuid: &ClusterUuid, version: u64) -> String {
    format!("{}{}/{}", manifests_prefix(uuid), version, MANIFEST_FILE_NAME)
}

pub fn snapshot_key(uuid: &ClusterUuid, offset: LogOffset) -> String {
    format!("{}{}/{}", cluster_prefix(uuid), offset, SNAPSHOT_FILE_NAME)
}

/// Version embedded in a manifest key, if `key` is one
pub fn parse_manifest_version(uuid: &ClusterUuid, key: &str) -> Option<u64> {
    let rest = key.strip_prefix(&manifests_prefix(uuid))?;
    let (version, file) = rest.split_once('/')?;
    if file != MANIFEST_FILE_NAME {
        return None;
    }
    let version: i64 = version.parse().ok()?;
    u64::try_from(version).ok()
}

/// Offset embedded in a snapshot key, if `key` is one
pub fn parse_snapshot_offset(uuid: &ClusterUuid, key: &str) -> Option<LogOffset> {
    let rest = key.strip_prefix(&cluster_prefix(uuid))?;
    let (offset, file) = rest.split_once('/')?;
    if file != SNAPSHOT_FILE_NAME {
        return None;
    }
    offset.parse().ok().map(LogOffset).filter(LogOffset::is_set)
}
