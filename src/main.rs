//! Metadata uploader
//!
//! Runs the uploader for a single standalone controller node. The node
//! leads a fixed term for the lifetime of the process. A session that ends
//! on its own (for example a failed bootstrap while the store is down) is
//! restarted after one upload interval.
//!
//! ## Usage
//!
//! ```text
//! metadata-uploader [CONFIG_PATH]
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | META_SYNC_CONFIG | - | Config path when none is given on the command line |
//! | META_SYNC_SNAPSHOT | ./controller.snapshot | Local controller snapshot file |
//! | META_SYNC_TERM | 1 | Leadership term to run under |
//! | META_SYNC_* | - | Config overrides (see `UploaderConfig::apply_env_from`) |
//!
//! On Unix, SIGHUP re-reads the config file and applies a changed upload
//! interval to the running session.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use cloud_metadata_sync::clock::ProductionClock;
use cloud_metadata_sync::config::{ObjectStoreType, UploaderConfig};
use cloud_metadata_sync::consensus::{StaticLeader, Term};
use cloud_metadata_sync::manifest::ClusterUuid;
use cloud_metadata_sync::observability::init_tracing;
use cloud_metadata_sync::remote::Remote;
use cloud_metadata_sync::storage::{InMemoryObjectStore, LocalFsObjectStore, ObjectStore};
use cloud_metadata_sync::uploader::{UploaderContext, UploaderService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_SNAPSHOT_PATH: &str = "./controller.snapshot";
const DEFAULT_TERM: u64 = 1;

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("META_SYNC_CONFIG").ok())
        .map(PathBuf::from)
}

fn load_config(path: Option<&Path>) -> Result<UploaderConfig, String> {
    match path {
        Some(path) => UploaderConfig::load(path).map_err(|e| e.to_string()),
        None => {
            let mut config = UploaderConfig::default();
            config
                .apply_env_from(|key| std::env::var(key).ok())
                .map_err(|e| e.to_string())?;
            config.validate().map_err(|e| e.to_string())?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() {
    let path = config_path();
    let config = match load_config(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(2);
        }
    };
    init_tracing(&config.log);

    let result = match config.store_type {
        ObjectStoreType::InMemory => {
            warn!("Using in-memory object store; nothing survives this process");
            run(config, path, InMemoryObjectStore::new()).await
        }
        ObjectStoreType::LocalFs => {
            let root = config.local_path.clone().unwrap_or_else(|| PathBuf::from("."));
            let store = LocalFsObjectStore::for_bucket(&root, &config.bucket);
            info!(path = %store.base_path().display(), "Using local filesystem object store");
            run(config, path, store).await
        }
        #[cfg(feature = "s3")]
        ObjectStoreType::S3 => {
            match config.s3.clone() {
                Some(s3_config) => {
                    match cloud_metadata_sync::storage::S3ObjectStore::new(&config.bucket, &s3_config) {
                        Ok(store) => {
                            info!(bucket = %config.bucket, prefix = %s3_config.prefix, "Using S3 object store");
                            run(config, path, store).await
                        }
                        Err(e) => Err(format!("failed to create S3 store: {}", e)),
                    }
                }
                None => Err("[s3] section is required for the s3 store".to_string()),
            }
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Metadata uploader failed");
        std::process::exit(1);
    }
}

async fn run<S: ObjectStore + 'static>(
    config: UploaderConfig,
    path: Option<PathBuf>,
    store: S,
) -> Result<(), String> {
    let cluster = ClusterUuid::parse(&config.cluster_uuid)?;
    let term = std::env::var("META_SYNC_TERM")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Term)
        .unwrap_or(Term(DEFAULT_TERM));
    let snapshot_path = std::env::var("META_SYNC_SNAPSHOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SNAPSHOT_PATH));

    let consensus = Arc::new(StaticLeader::new(term, snapshot_path));
    let remote = Arc::new(Remote::new(store, config.bucket.clone()));
    let ctx = UploaderContext::from_config(&config, cluster.clone(), consensus, remote, ProductionClock::new());
    let interval = ctx.interval.clone();
    let service = UploaderService::new(ctx);

    info!(
        cluster = %cluster,
        bucket = %config.bucket,
        term = %term,
        interval_ms = config.upload_interval.as_millis() as u64,
        "Metadata uploader starting"
    );
    let shutdown = CancellationToken::new();
    tokio::join!(service.lead_until_shutdown(term, &shutdown), async {
        wait_for_shutdown(path.as_deref(), |reloaded| {
            if let Err(e) = interval.set(reloaded.upload_interval) {
                warn!(error = %e, "Ignoring reloaded upload interval");
            } else {
                info!(interval_ms = reloaded.upload_interval.as_millis() as u64, "Upload interval reloaded");
            }
        })
        .await;
        shutdown.cancel();
    });

    info!("Shutdown signal received");
    if let Some(report) = service.stop_and_wait().await {
        info!(
            cycles = report.cycles,
            successful = report.successful_cycles,
            failed = report.failed_cycles,
            last_version = ?report.last_persisted_version,
            "Metadata uploader stopped"
        );
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown<F: Fn(UploaderConfig)>(path: Option<&Path>, on_reload: F) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable, config reload disabled");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            _ = hangup.recv() => match load_config(path) {
                Ok(config) => on_reload(config),
                Err(e) => warn!(error = %e, "Config reload failed"),
            },
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown<F: Fn(UploaderConfig)>(_path: Option<&Path>, _on_reload: F) {
    let _ = tokio::signal::ctrl_c().await;
}
