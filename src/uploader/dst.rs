//! Deterministic Simulation Testing for the metadata uploader
//!
//! Several simulated nodes share one bucket. The harness moves leadership
//! around, delays leadership notifications so deposed leaders keep a stale
//! view, advances each node's controller snapshot, reloads the upload
//! interval, and lets the object store and consensus inject faults. Every
//! write and delete that actually lands is appended to an audit log tagged
//! with who was leader at that instant; the invariants are checked against
//! that log.
//!
//! ## Invariants
//!
//! - Version monotonicity: a manifest written by the current leader carries a
//!   strictly higher version than every earlier leader-written manifest
//!   (an identical re-put after a lost acknowledgement is a retry, not a new
//!   version).
//! - Snapshot coverage: a leader-written manifest never references a lower
//!   offset than an earlier leader-written manifest.
//! - Reaping safety: the current leader never deletes the latest committed
//!   manifest or the snapshot it references.
//!
//! Writes and deletes that land after their writer was deposed are the known
//! stale-write race. They are counted, not treated as violations. A stale
//! manifest that becomes the highest version in the bucket can lower the
//! snapshot coverage floor to its own offset, since later leaders may
//! bootstrap from it.
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = UploaderDstHarness::new(UploaderDstConfig::moderate(seed));
//!     harness.run(200).await;
//!     harness.check_invariants();  // result carries the seed on failure
//! }
//! ```

use super::service::UploaderService;
use super::session::SessionReport;
use super::UploaderContext;
use crate::buggify::{self, BuggifyStats};
use crate::clock::SimulatedClock;
use crate::config::{RetryConfig, UploadInterval};
use crate::consensus::simulated::NodeId;
use crate::consensus::{
    Consensus, SimulatedCluster, SimulatedConsensus, SimulatedConsensusConfig, SnapshotHeader, Term,
};
use crate::io::{Rng, SimulatedRng};
use crate::manifest::{keys, ClusterManifest, ClusterUuid, LogOffset};
use crate::remote::Remote;
use crate::storage::{
    InMemoryObjectStore, ListResult, ObjectStore, SimulatedObjectStore, SimulatedStoreConfig,
    SimulatedStoreStats,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::io::Result as IoResult;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for uploader DST
#[derive(Debug, Clone)]
pub struct UploaderDstConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of simulated nodes
    pub nodes: usize,
    /// Object store fault configuration (per node)
    pub store_config: SimulatedStoreConfig,
    /// Consensus fault configuration (per node)
    pub consensus_config: SimulatedConsensusConfig,
    /// Initial upload interval
    pub upload_interval: Duration,
    /// Probability per step that leadership moves
    pub leadership_change_prob: f64,
    /// Probability that a deposed node hears about it late
    pub delayed_notification_prob: f64,
    /// Probability per step that a node takes a new snapshot
    pub snapshot_prob: f64,
    /// Probability per step that the upload interval is reloaded
    pub interval_reload_prob: f64,
    /// Upper bound on virtual time between steps
    pub max_step_ms: u64,
}

impl Default for UploaderDstConfig {
    fn default() -> Self {
        UploaderDstConfig {
            seed: 0,
            nodes: 3,
            store_config: SimulatedStoreConfig::default(),
            consensus_config: SimulatedConsensusConfig::default(),
            upload_interval: Duration::from_millis(200),
            leadership_change_prob: 0.05,
            delayed_notification_prob: 0.3,
            snapshot_prob: 0.1,
            interval_reload_prob: 0.02,
            max_step_ms: 150,
        }
    }
}

impl UploaderDstConfig {
    pub fn new(seed: u64) -> Self {
        UploaderDstConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no faults, rare leadership changes
    pub fn calm(seed: u64) -> Self {
        UploaderDstConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            consensus_config: SimulatedConsensusConfig::no_faults(),
            leadership_change_prob: 0.02,
            delayed_notification_prob: 0.0,
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        UploaderDstConfig {
            seed,
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive faults and frequent leadership churn
    pub fn chaos(seed: u64) -> Self {
        UploaderDstConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            consensus_config: SimulatedConsensusConfig::high_chaos(),
            leadership_change_prob: 0.15,
            delayed_notification_prob: 0.5,
            snapshot_prob: 0.2,
            interval_reload_prob: 0.05,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
enum AuditedOp {
    Put {
        key: String,
        data: Vec<u8>,
        /// Highest manifest version present just before this put
        highest_before: Option<u64>,
    },
    Delete {
        key: String,
    },
}

#[derive(Debug, Clone)]
struct AuditEvent {
    node: NodeId,
    /// Writer was not the committed leader when the operation landed
    stale: bool,
    op: AuditedOp,
}

/// Pass-through store that logs every put and delete that lands
#[derive(Clone)]
struct AuditedStore {
    node: NodeId,
    cluster_uuid: ClusterUuid,
    inner: InMemoryObjectStore,
    leadership: SimulatedCluster,
    log: Arc<Mutex<Vec<AuditEvent>>>,
}

impl AuditedStore {
    fn highest_manifest_version(&self) -> Option<u64> {
        self.inner
            .keys()
            .iter()
            .filter_map(|k| keys::parse_manifest_version(&self.cluster_uuid, k))
            .max()
    }

    fn record(&self, op: AuditedOp) {
        let stale = self.leadership.leader() != Some(self.node);
        self.log.lock().push(AuditEvent {
            node: self.node,
            stale,
            op,
        });
    }
}

impl ObjectStore for AuditedStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let highest_before = self.highest_manifest_version();
            self.inner.put(key, data).await?;
            self.record(AuditedOp::Put {
                key: key.to_string(),
                data: data.to_vec(),
                highest_before,
            });
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        self.inner.get(key)
    }

    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        self.inner.exists(key)
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.inner.delete(key).await?;
            self.record(AuditedOp::Delete {
                key: key.to_string(),
            });
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>> {
        self.inner.list(prefix, continuation_token)
    }
}

type DstStore = SimulatedObjectStore<AuditedStore, SimulatedRng>;
type DstConsensus = SimulatedConsensus<SimulatedRng>;
type DstService = UploaderService<DstConsensus, Remote<DstStore>, SimulatedClock>;

struct DstNode {
    consensus: Arc<DstConsensus>,
    store: Arc<Remote<DstStore>>,
    interval: UploadInterval,
    service: DstService,
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct UploaderDstResult {
    /// Seed used
    pub seed: u64,
    /// Harness steps executed
    pub steps: u64,
    pub leadership_changes: u64,
    pub snapshots_taken: u64,
    /// Sessions joined (all exits)
    pub sessions: u64,
    pub cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    /// Manifest puts that landed (including retries and stale writes)
    pub manifests_landed: u64,
    pub deletes_landed: u64,
    /// Puts and deletes that landed after their writer was deposed
    pub stale_writes: u64,
    /// Stale manifests that became the highest version in the bucket
    pub stale_overwrites: u64,
    /// Highest manifest version in the bucket at the end
    pub final_version: Option<u64>,
    /// Object store fault statistics, summed over nodes
    pub store_stats: SimulatedStoreStats,
    /// Fault triggers across every injection site of this run
    pub faults: BuggifyStats,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
}

impl UploaderDstResult {
    pub fn new(seed: u64) -> Self {
        UploaderDstResult {
            seed,
            steps: 0,
            leadership_changes: 0,
            snapshots_taken: 0,
            sessions: 0,
            cycles: 0,
            successful_cycles: 0,
            failed_cycles: 0,
            manifests_landed: 0,
            deletes_landed: 0,
            stale_writes: 0,
            stale_overwrites: 0,
            final_version: None,
            store_stats: SimulatedStoreStats::default(),
            faults: BuggifyStats::default(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} steps, {} leader changes, {} sessions, {} cycles ({} ok, {} failed), \
             {} manifests, {} deletes, {} stale writes, final version {:?}, {} violations",
            self.seed,
            self.steps,
            self.leadership_changes,
            self.sessions,
            self.cycles,
            self.successful_cycles,
            self.failed_cycles,
            self.manifests_landed,
            self.deletes_landed,
            self.stale_writes,
            self.final_version,
            self.invariant_violations.len()
        )
    }

    fn absorb(&mut self, report: &SessionReport) {
        self.sessions += 1;
        self.cycles += report.cycles;
        self.successful_cycles += report.successful_cycles;
        self.failed_cycles += report.failed_cycles;
    }
}

/// Main DST harness for the uploader
pub struct UploaderDstHarness {
    config: UploaderDstConfig,
    rng: SimulatedRng,
    cluster_uuid: ClusterUuid,
    leadership: SimulatedCluster,
    bucket: InMemoryObjectStore,
    log: Arc<Mutex<Vec<AuditEvent>>>,
    clock: SimulatedClock,
    nodes: Vec<DstNode>,
    log_head: i64,
    result: UploaderDstResult,
}

impl UploaderDstHarness {
    pub fn new(config: UploaderDstConfig) -> Self {
        let mut rng = SimulatedRng::new(config.seed);
        let cluster_uuid = ClusterUuid::parse("dst-cluster").expect("static uuid is valid");
        let leadership = SimulatedCluster::new();
        let bucket = InMemoryObjectStore::with_page_size(8);
        let log = Arc::new(Mutex::new(Vec::new()));
        let clock = SimulatedClock::new(1_700_000_000_000);

        let nodes = (0..config.nodes.max(1) as NodeId)
            .map(|node| {
                let audited = AuditedStore {
                    node,
                    cluster_uuid: cluster_uuid.clone(),
                    inner: bucket.clone(),
                    leadership: leadership.clone(),
                    log: log.clone(),
                };
                let store = Arc::new(Remote::new(
                    SimulatedObjectStore::new(
                        audited,
                        SimulatedRng::new(rng.next_u64()),
                        config.store_config.clone(),
                    ),
                    "dst-bucket",
                ));
                let consensus = Arc::new(SimulatedConsensus::new(
                    node,
                    leadership.clone(),
                    SimulatedRng::new(rng.next_u64()),
                    config.consensus_config.clone(),
                ));
                let interval = UploadInterval::new(config.upload_interval);
                let ctx = UploaderContext::new(
                    cluster_uuid.clone(),
                    consensus.clone(),
                    store.clone(),
                    clock.clone(),
                    interval.clone(),
                    RetryConfig::test(),
                )
                .with_jitter_seed(rng.next_u64());
                DstNode {
                    consensus,
                    store,
                    interval,
                    service: UploaderService::new(ctx),
                }
            })
            .collect();

        UploaderDstHarness {
            result: UploaderDstResult::new(config.seed),
            config,
            rng,
            cluster_uuid,
            leadership,
            bucket,
            log,
            clock,
            nodes,
            log_head: 0,
        }
    }

    fn collect_reports(&mut self) {
        for node in &self.nodes {
            for report in node.service.take_reports() {
                self.result.absorb(&report);
            }
        }
    }

    /// Stop `node`'s session, then elect it in a fresh term
    async fn elect(&mut self, node: usize) {
        self.nodes[node].service.on_leadership_lost().await;
        let term = self.leadership.elect(node as NodeId);
        self.result.leadership_changes += 1;

        for (i, other) in self.nodes.iter().enumerate() {
            if i == node {
                continue;
            }
            if self.rng.gen_bool(self.config.delayed_notification_prob) {
                continue;
            }
            other.consensus.sync_view();
            other.service.on_leadership_lost().await;
        }

        let leader = &self.nodes[node];
        leader.consensus.sync_view();
        leader.service.on_leadership_acquired(term).await;
    }

    /// Deliver every delayed notification
    async fn deliver_notifications(&mut self) {
        for node in &self.nodes {
            node.consensus.sync_view();
            if !node.consensus.is_leader() {
                node.service.on_leadership_lost().await;
            }
        }
    }

    /// Restart the leader's session if it ended (failed bootstrap, barrier fault)
    async fn ensure_leader_session(&mut self) {
        let Some(leader) = self.leadership.leader() else {
            return;
        };
        let term = self.leadership.term();
        let node = &self.nodes[leader as usize];
        if node.service.active_term().await != Some(term) {
            node.consensus.sync_view();
            node.service.on_leadership_acquired(term).await;
        }
    }

    fn take_snapshot(&mut self) {
        let node = self.rng.gen_range(0, self.nodes.len() as u64) as usize;
        self.log_head += self.rng.gen_range(1, 50) as i64;
        self.nodes[node].consensus.install_snapshot(
            SnapshotHeader::new(LogOffset(self.log_head), self.leadership.term()),
            format!("controller state at {}", self.log_head).as_bytes(),
        );
        self.result.snapshots_taken += 1;
    }

    /// Run the workload for `steps` steps, then stop every node
    pub async fn run(&mut self, steps: usize) {
        buggify::reset_stats();
        self.elect(0).await;

        for _ in 0..steps {
            let wait = self.rng.gen_range(1, self.config.max_step_ms.max(2));
            self.clock.advance_ms(wait as i64);
            tokio::time::sleep(Duration::from_millis(wait)).await;
            self.result.steps += 1;

            if self.rng.gen_bool(self.config.snapshot_prob) {
                self.take_snapshot();
            }
            if self.rng.gen_bool(self.config.interval_reload_prob) {
                let ms = self.rng.gen_range(
                    self.config.upload_interval.as_millis() as u64 / 2,
                    self.config.upload_interval.as_millis() as u64 * 2,
                );
                for node in &self.nodes {
                    // Zero is rejected and leaves the old interval in place
                    let _ = node.interval.set(Duration::from_millis(ms));
                }
            }
            if self.rng.gen_bool(self.config.leadership_change_prob) {
                let next = self.rng.gen_range(0, self.nodes.len() as u64) as usize;
                self.elect(next).await;
            } else if self.rng.gen_bool(0.2) {
                self.deliver_notifications().await;
            }
            self.ensure_leader_session().await;
            self.collect_reports();
        }

        for node in &self.nodes {
            node.service.stop_and_wait().await;
        }
        self.collect_reports();

        for node in &self.nodes {
            let stats = node.store.store().stats();
            let total = &mut self.result.store_stats;
            total.put_attempts += stats.put_attempts;
            total.put_failures += stats.put_failures;
            total.put_lost_acks += stats.put_lost_acks;
            total.get_attempts += stats.get_attempts;
            total.get_failures += stats.get_failures;
            total.delete_attempts += stats.delete_attempts;
            total.delete_failures += stats.delete_failures;
            total.list_attempts += stats.list_attempts;
            total.list_failures += stats.list_failures;
            total.timeouts += stats.timeouts;
        }
        self.result.faults = buggify::get_stats();
    }

    /// Check all invariants against the audit log and final bucket state
    pub fn check_invariants(&mut self) {
        let events = self.log.lock().clone();
        let cluster = &self.cluster_uuid;
        let mut violations = Vec::new();

        let mut max_version: Option<u64> = None;
        let mut offset_floor = LogOffset::NONE;
        let mut last_put: HashMap<String, Vec<u8>> = HashMap::new();
        let mut committed: Option<ClusterManifest> = None;

        for (i, event) in events.iter().enumerate() {
            match &event.op {
                AuditedOp::Put {
                    key,
                    data,
                    highest_before,
                } => {
                    let Some(version) = keys::parse_manifest_version(cluster, key) else {
                        continue;
                    };
                    self.result.manifests_landed += 1;
                    let manifest = match ClusterManifest::decode_for(cluster, data) {
                        Ok(m) => m,
                        Err(e) => {
                            violations.push(format!("event {}: undecodable manifest {}: {}", i, key, e));
                            continue;
                        }
                    };

                    if event.stale {
                        self.result.stale_writes += 1;
                        if highest_before.map_or(true, |h| version >= h) {
                            self.result.stale_overwrites += 1;
                            offset_floor = offset_floor.min(manifest.snapshot_offset);
                        }
                        continue;
                    }

                    if let Some(max) = max_version {
                        let is_retry = version == max && last_put.get(key) == Some(data);
                        if version <= max && !is_retry {
                            violations.push(format!(
                                "event {}: node {} wrote version {} after version {}",
                                i, event.node, version, max
                            ));
                        }
                    }
                    if manifest.snapshot_offset < offset_floor {
                        violations.push(format!(
                            "event {}: node {} wrote snapshot offset {} below {}",
                            i, event.node, manifest.snapshot_offset, offset_floor
                        ));
                    }

                    max_version = Some(max_version.map_or(version, |m| m.max(version)));
                    offset_floor = offset_floor.max(manifest.snapshot_offset);
                    last_put.insert(key.clone(), data.clone());
                    committed = Some(manifest);
                }
                AuditedOp::Delete { key } => {
                    self.result.deletes_landed += 1;
                    if event.stale {
                        self.result.stale_writes += 1;
                        continue;
                    }
                    if let Some(live) = &committed {
                        let live_key = live.key().ok();
                        if live_key.as_deref() == Some(key.as_str())
                            || live.snapshot_reference.as_deref() == Some(key.as_str())
                        {
                            violations.push(format!(
                                "event {}: node {} deleted live object {}",
                                i, event.node, key
                            ));
                        }
                    }
                }
            }
        }

        // Final bucket state
        let keys_now = self.bucket.keys();
        self.result.final_version = keys_now
            .iter()
            .filter_map(|k| keys::parse_manifest_version(cluster, k))
            .max();
        if self.result.stale_overwrites == 0 {
            if let Some(version) = self.result.final_version {
                let key = keys::manifest_key(cluster, version);
                let reference = self
                    .bucket
                    .peek(&key)
                    .and_then(|data| ClusterManifest::decode_for(cluster, &data).ok())
                    .and_then(|m| m.snapshot_reference);
                if let Some(reference) = reference {
                    if !keys_now.contains(&reference) {
                        violations.push(format!(
                            "final manifest {} references missing snapshot {}",
                            version, reference
                        ));
                    }
                }
            }
        }

        self.result.invariant_violations = violations;
    }

    pub fn current_term(&self) -> Term {
        self.leadership.term()
    }

    /// Get the result
    pub fn result(&self) -> &UploaderDstResult {
        &self.result
    }

    /// Consume and return the result
    pub fn into_result(self) -> UploaderDstResult {
        self.result
    }
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    steps_per_run: usize,
    config_fn: impl Fn(u64) -> UploaderDstConfig,
) -> Vec<UploaderDstResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = UploaderDstHarness::new(config_fn(seed));
        harness.run(steps_per_run).await;
        harness.check_invariants();
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[UploaderDstResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_cycles: u64 = results.iter().map(|r| r.cycles).sum();
    let total_changes: u64 = results.iter().map(|r| r.leadership_changes).sum();
    let total_stale: u64 = results.iter().map(|r| r.stale_writes).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} cycles, {} leadership changes, {} stale writes",
        passed, total, total_cycles, total_changes, total_stale
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_dst_harness_calm() {
        let mut harness = UploaderDstHarness::new(UploaderDstConfig::calm(42));
        harness.run(100).await;
        harness.check_invariants();

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {:?}",
            result.invariant_violations
        );
        assert!(result.successful_cycles > 0);
        assert!(result.final_version.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dst_harness_with_faults() {
        let mut harness = UploaderDstHarness::new(UploaderDstConfig::moderate(123));
        harness.run(200).await;
        harness.check_invariants();

        let result = harness.result();
        println!("{}", result.summary());
        assert!(
            result.is_success(),
            "Seed {} violated invariants: {:?}",
            result.seed,
            result.invariant_violations
        );
        assert_eq!(result.steps, 200);
        assert!(!result.faults.checks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dst_faults_disabled_by_thread_config() {
        buggify::set_config(buggify::FaultConfig::disabled());
        let mut harness = UploaderDstHarness::new(UploaderDstConfig::chaos(99));
        harness.run(100).await;
        harness.check_invariants();
        buggify::set_config(buggify::FaultConfig::default());

        let result = harness.result();
        assert!(result.is_success(), "{:?}", result.invariant_violations);
        assert_eq!(result.faults.total_triggers(), 0);
        assert_eq!(result.store_stats.put_failures, 0);
        assert_eq!(result.store_stats.timeouts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dst_deterministic() {
        let seed = 12345;

        let mut harness1 = UploaderDstHarness::new(UploaderDstConfig::calm(seed));
        harness1.run(50).await;
        harness1.check_invariants();

        let mut harness2 = UploaderDstHarness::new(UploaderDstConfig::calm(seed));
        harness2.run(50).await;
        harness2.check_invariants();

        assert_eq!(
            harness1.result().leadership_changes,
            harness2.result().leadership_changes,
            "Same seed should produce same results"
        );
        assert_eq!(harness1.result().snapshots_taken, harness2.result().snapshots_taken);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dst_batch_calm() {
        let results = run_dst_batch(1000, 5, 60, UploaderDstConfig::calm).await;
        println!("{}", summarize_batch(&results));
        assert!(results.iter().all(|r| r.is_success()), "All calm runs should pass");
    }
}
