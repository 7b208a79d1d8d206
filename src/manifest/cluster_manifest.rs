//! Cluster Metadata Manifest
//!
//! The manifest is the unit of externalized state. One object is written per
//! version; the highest version in the store is the current one.
//!
//! ## Wire format (JSON, field names are stable)
//!
//! ```text
//! {
//!   "cluster_uuid": "...",
//!   "version": 3,                 // -1 never reaches the store
//!   "upload_timestamp": 1700000000000,
//!   "snapshot_reference": "cluster_metadata/.../100/controller.snapshot",
//!   "snapshot_offset": 100        // 0 = no snapshot
//! }
//! ```

use super::keys;
use super::types::{ClusterUuid, LogOffset};
use crate::clock::EpochMillis;
use serde::{Deserialize, Serialize};

/// Error type for manifest encoding and validation
#[derive(Debug)]
pub enum ManifestError {
    /// JSON serialization/deserialization error
    Json(serde_json::Error),
    /// Decoded manifest belongs to a different cluster
    ClusterMismatch {
        expected: ClusterUuid,
        actual: ClusterUuid,
    },
    /// A manifest without a version cannot be persisted or keyed
    Unversioned,
}

impl std::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestError::Json(e) => write!(f, "JSON error: {}", e),
            ManifestError::ClusterMismatch { expected, actual } => {
                write!(
                    f,
                    "Manifest cluster mismatch: expected {}, got {}",
                    expected, actual
                )
            }
            ManifestError::Unversioned => write!(f, "Manifest has no version"),
        }
    }
}

impl std::error::Error for ManifestError {}

impl From<serde_json::Error> for ManifestError {
    fn from(e: serde_json::Error) -> Self {
        ManifestError::Json(e)
    }
}

/// Versioned external record of cluster metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterManifest {
    pub cluster_uuid: ClusterUuid,
    /// `None` until the first cycle of a fresh lineage
    #[serde(with = "version_wire")]
    pub version: Option<u64>,
    #[serde(rename = "upload_timestamp")]
    pub upload_timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_reference: Option<String>,
    #[serde(default)]
    pub snapshot_offset: LogOffset,
}

impl ClusterManifest {
    /// Fresh, unversioned manifest with no snapshot
    pub fn new(cluster_uuid: ClusterUuid) -> Self {
        ClusterManifest {
            cluster_uuid,
            version: None,
            upload_timestamp_ms: 0,
            snapshot_reference: None,
            snapshot_offset: LogOffset::NONE,
        }
    }

    /// Bump the version: unset becomes 0, otherwise +1
    pub fn advance_version(&mut self) -> u64 {
        let next = match self.version {
            None => 0,
            Some(v) => v
                .checked_add(1)
                .filter(|next| *next <= keys::MAX_MANIFEST_VERSION)
                .expect("manifest version exceeds the int64 wire range"),
        };
        self.version = Some(next);
        next
    }

    pub fn stamp(&mut self, now: EpochMillis) {
        self.upload_timestamp_ms = now.as_millis();
    }

    /// Point the manifest at a newly uploaded snapshot
    pub fn record_snapshot(&mut self, key: String, offset: LogOffset) {
        debug_assert!(
            offset >= self.snapshot_offset,
            "snapshot offset must not decrease: {} -> {}",
            self.snapshot_offset,
            offset
        );
        self.snapshot_reference = Some(key);
        self.snapshot_offset = offset;

        #[cfg(debug_assertions)]
        self.verify_invariants();
    }

    /// Object key this manifest is persisted under
    pub fn key(&self) -> Result<String, ManifestError> {
        let version = self.version.ok_or(ManifestError::Unversioned)?;
        Ok(keys::manifest_key(&self.cluster_uuid, version))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decode and check the manifest belongs to `expected`
    pub fn decode_for(expected: &ClusterUuid, data: &[u8]) -> Result<Self, ManifestError> {
        let manifest = Self::from_json(data)?;
        if &manifest.cluster_uuid != expected {
            return Err(ManifestError::ClusterMismatch {
                expected: expected.clone(),
                actual: manifest.cluster_uuid,
            });
        }
        Ok(manifest)
    }

    /// Verify all invariants hold
    ///
    /// # Invariants
    /// - A snapshot reference exists iff the snapshot offset is set
    /// - The reference is the key derived from (uuid, offset)
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        debug_assert_eq!(
            self.snapshot_reference.is_some(),
            self.snapshot_offset.is_set(),
            "Invariant violated: snapshot reference/offset presence mismatch"
        );
        if let Some(reference) = &self.snapshot_reference {
            debug_assert_eq!(
                reference,
                &keys::snapshot_key(&self.cluster_uuid, self.snapshot_offset),
                "Invariant violated: snapshot reference does not match offset"
            );
        }
    }
}

/// `Option<u64>` version on the wire as int64, `-1` meaning unset
mod version_wire {
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(version: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match version {
            Some(v) => i64::try_from(*v)
                .map_err(|_| S::Error::custom(format!("manifest version {} exceeds int64", v)))?
                .serialize(serializer),
            None => (-1i64).serialize(serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        Ok(if raw < 0 { None } else { Some(raw as u64) })
    }
}
