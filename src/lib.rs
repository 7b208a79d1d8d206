pub mod io;
pub mod buggify;
pub mod clock;
pub mod config;
pub mod observability;
pub mod storage;
pub mod manifest;
pub mod remote;
pub mod consensus;
pub mod uploader;

#[cfg(test)]
pub mod stateright;

pub use config::{ConfigError, ObjectStoreType, UploadInterval, UploaderConfig};
pub use consensus::{Consensus, StaticLeader, Term};
pub use manifest::{ClusterManifest, ClusterUuid, LogOffset};
pub use remote::{MetadataStore, Remote, StoreError};
pub use uploader::{UploaderContext, UploaderService};
