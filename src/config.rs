//! Uploader Configuration
//!
//! Loaded from TOML, then overridden by `META_SYNC_*` environment variables.
//! The upload interval is the one dynamically reloadable setting; it is
//! handed to the uploader as an [`UploadInterval`] binding and re-read each
//! time a sleep or retry deadline is computed.

use crate::manifest::ClusterUuid;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Error type for configuration loading and validation
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error reading config: {}", e),
            ConfigError::Toml(e) => write!(f, "Config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}

/// Main configuration for the metadata uploader
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Cluster identity; scopes every remote key
    pub cluster_uuid: String,
    /// Target bucket for manifests and snapshots
    pub bucket: String,
    /// Time between upload cycles (default: 60s)
    #[serde(rename = "upload_interval_ms", with = "duration_millis")]
    pub upload_interval: Duration,
    /// Per-operation retry backoff
    pub retry: RetryConfig,
    /// Object store type
    pub store_type: ObjectStoreType,
    /// Local filesystem path (for LocalFs store)
    pub local_path: Option<PathBuf>,
    /// S3 configuration (for S3 store)
    #[cfg(feature = "s3")]
    pub s3: Option<S3Config>,
    /// Logging settings
    pub log: LogConfig,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        UploaderConfig {
            cluster_uuid: String::new(),
            bucket: String::new(),
            upload_interval: Duration::from_secs(60),
            retry: RetryConfig::default(),
            store_type: ObjectStoreType::InMemory,
            local_path: None,
            #[cfg(feature = "s3")]
            s3: None,
            log: LogConfig::default(),
        }
    }
}

impl UploaderConfig {
    /// Config for local development against a directory
    pub fn local(cluster_uuid: &str, bucket: &str, path: PathBuf) -> Self {
        UploaderConfig {
            cluster_uuid: cluster_uuid.to_string(),
            bucket: bucket.to_string(),
            store_type: ObjectStoreType::LocalFs,
            local_path: Some(path),
            ..Default::default()
        }
    }

    /// Config for tests (in-memory, short intervals)
    pub fn test() -> Self {
        UploaderConfig {
            cluster_uuid: "test-cluster".to_string(),
            bucket: "test-bucket".to_string(),
            upload_interval: Duration::from_millis(50),
            retry: RetryConfig::test(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file, apply environment overrides, validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `META_SYNC_*` overrides from the given lookup
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | META_SYNC_CLUSTER_UUID | cluster_uuid |
    /// | META_SYNC_BUCKET | bucket |
    /// | META_SYNC_UPLOAD_INTERVAL_MS | upload_interval |
    /// | META_SYNC_STORE_TYPE | store_type (memory, localfs, s3) |
    /// | META_SYNC_DATA_PATH | local_path |
    /// | META_SYNC_LOG_LEVEL | log.level |
    /// | META_SYNC_LOG_JSON | log.json |
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("META_SYNC_CLUSTER_UUID") {
            self.cluster_uuid = v;
        }
        if let Some(v) = lookup("META_SYNC_BUCKET") {
            self.bucket = v;
        }
        if let Some(v) = lookup("META_SYNC_UPLOAD_INTERVAL_MS") {
            let ms: u64 = v.parse().map_err(|_| {
                ConfigError::Invalid(format!("META_SYNC_UPLOAD_INTERVAL_MS not a number: {}", v))
            })?;
            self.upload_interval = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("META_SYNC_STORE_TYPE") {
            self.store_type = ObjectStoreType::parse(&v)?;
        }
        if let Some(v) = lookup("META_SYNC_DATA_PATH") {
            self.local_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("META_SYNC_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = lookup("META_SYNC_LOG_JSON") {
            self.log.json = v == "true" || v == "1";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ClusterUuid::parse(&self.cluster_uuid).map_err(ConfigError::Invalid)?;
        if self.bucket.is_empty() {
            return Err(ConfigError::Invalid("bucket must not be empty".to_string()));
        }
        if self.upload_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "upload_interval_ms must be positive".to_string(),
            ));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(ConfigError::Invalid(format!(
                "retry.initial_backoff_ms ({:?}) exceeds retry.max_backoff_ms ({:?})",
                self.retry.initial_backoff, self.retry.max_backoff
            )));
        }
        if self.store_type == ObjectStoreType::LocalFs && self.local_path.is_none() {
            return Err(ConfigError::Invalid(
                "local_path is required for the localfs store".to_string(),
            ));
        }
        #[cfg(feature = "s3")]
        if self.store_type == ObjectStoreType::S3 && self.s3.is_none() {
            return Err(ConfigError::Invalid(
                "[s3] section is required for the s3 store".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the reloadable interval binding from this config
    pub fn interval_binding(&self) -> UploadInterval {
        UploadInterval::new(self.upload_interval)
    }
}

/// Type of object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreType {
    /// In-memory store (for tests)
    InMemory,
    /// Local filesystem
    LocalFs,
    /// Amazon S3 or compatible
    #[cfg(feature = "s3")]
    S3,
}

impl ObjectStoreType {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(ObjectStoreType::InMemory),
            "localfs" | "local_fs" => Ok(ObjectStoreType::LocalFs),
            #[cfg(feature = "s3")]
            "s3" => Ok(ObjectStoreType::S3),
            other => Err(ConfigError::Invalid(format!("unknown store type: {}", other))),
        }
    }
}

/// S3 configuration; the bucket comes from `UploaderConfig::bucket`
#[cfg(feature = "s3")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Key prefix within bucket
    #[serde(default)]
    pub prefix: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
}

/// Retry backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First backoff delay (default: 100ms)
    #[serde(rename = "initial_backoff_ms", with = "duration_millis")]
    pub initial_backoff: Duration,
    /// Backoff ceiling (default: 5s)
    #[serde(rename = "max_backoff_ms", with = "duration_millis")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn test() -> Self {
        RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Reloadable upload interval
///
/// Clones share one value; `set()` on any clone is observed by the next
/// `get()` on every other clone.
#[derive(Debug, Clone)]
pub struct UploadInterval {
    inner: Arc<RwLock<Duration>>,
}

impl UploadInterval {
    pub fn new(interval: Duration) -> Self {
        UploadInterval {
            inner: Arc::new(RwLock::new(interval)),
        }
    }

    pub fn get(&self) -> Duration {
        *self.inner.read()
    }

    pub fn set(&self, interval: Duration) -> Result<(), ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::Invalid(
                "upload interval must be positive".to_string(),
            ));
        }
        *self.inner.write() = interval;
        Ok(())
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = UploaderConfig::default();
        assert_eq!(config.upload_interval, Duration::from_secs(60));
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.store_type, ObjectStoreType::InMemory);
        // Identity and bucket have no sensible default
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_test_config_is_valid() {
        UploaderConfig::test().validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
            cluster_uuid = "5b1c0f6e-a3d2-4c57-9e10-2f7d3b6a8c41"
            bucket = "dr-metadata"
            upload_interval_ms = 30000
            store_type = "local_fs"
            local_path = "/var/lib/meta"

            [retry]
            initial_backoff_ms = 250
            max_backoff_ms = 2000

            [log]
            level = "debug"
            json = true
        "#;
        let config = UploaderConfig::from_toml_str(text).unwrap();
        assert_eq!(config.bucket, "dr-metadata");
        assert_eq!(config.upload_interval, Duration::from_secs(30));
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(250));
        assert_eq!(config.store_type, ObjectStoreType::LocalFs);
        assert_eq!(config.local_path, Some(PathBuf::from("/var/lib/meta")));
        assert!(config.log.json);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config =
            UploaderConfig::from_toml_str("cluster_uuid = \"c1\"\nbucket = \"b\"\n").unwrap();
        assert_eq!(config.upload_interval, Duration::from_secs(60));
        assert_eq!(config.retry.max_backoff, Duration::from_secs(5));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("META_SYNC_BUCKET", "from-env"),
            ("META_SYNC_UPLOAD_INTERVAL_MS", "1500"),
            ("META_SYNC_STORE_TYPE", "localfs"),
            ("META_SYNC_DATA_PATH", "/tmp/meta"),
            ("META_SYNC_LOG_JSON", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = UploaderConfig::test();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bucket, "from-env");
        assert_eq!(config.upload_interval, Duration::from_millis(1500));
        assert_eq!(config.store_type, ObjectStoreType::LocalFs);
        assert_eq!(config.local_path, Some(PathBuf::from("/tmp/meta")));
        assert!(config.log.json);
    }

    #[test]
    fn test_env_bad_interval() {
        let mut config = UploaderConfig::test();
        let result = config.apply_env_from(|k| {
            (k == "META_SYNC_UPLOAD_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = UploaderConfig::test();
        config.bucket.clear();
        assert!(config.validate().is_err());

        let mut config = UploaderConfig::test();
        config.upload_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = UploaderConfig::test();
        config.retry.initial_backoff = Duration::from_secs(10);
        assert!(config.validate().is_err());

        let mut config = UploaderConfig::test();
        config.cluster_uuid = "has/slash".to_string();
        assert!(config.validate().is_err());

        let mut config = UploaderConfig::test();
        config.store_type = ObjectStoreType::LocalFs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_interval_reload_shared() {
        let interval = UploadInterval::new(Duration::from_secs(1));
        let other = interval.clone();

        other.set(Duration::from_millis(250)).unwrap();
        assert_eq!(interval.get(), Duration::from_millis(250));

        assert!(interval.set(Duration::ZERO).is_err());
        assert_eq!(other.get(), Duration::from_millis(250));
    }
}
