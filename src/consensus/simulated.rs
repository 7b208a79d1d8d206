//! Simulated consensus for DST
//!
//! [`SimulatedCluster`] holds the committed truth (who leads, in which term).
//! Each node's [`SimulatedConsensus`] keeps a local view that only catches up
//! when a leadership notification is delivered (`sync_view`) or a barrier
//! completes. The gap between the two is exactly the staleness window the
//! uploader's guard has to close.

use super::snapshot::encode_snapshot;
use super::{BarrierError, Consensus, LocalSnapshot, SnapshotError, SnapshotHeader, Term};
use crate::buggify::faults::consensus as faults;
use crate::io::Rng;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type NodeId = u64;

#[derive(Debug)]
struct ClusterTruth {
    leader: Option<NodeId>,
    term: Term,
}

/// Committed leadership state shared by every simulated node
#[derive(Debug, Clone)]
pub struct SimulatedCluster {
    truth: Arc<Mutex<ClusterTruth>>,
}

impl Default for SimulatedCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCluster {
    /// No leader, term 0
    pub fn new() -> Self {
        SimulatedCluster {
            truth: Arc::new(Mutex::new(ClusterTruth {
                leader: None,
                term: Term(0),
            })),
        }
    }

    pub fn with_leader(node: NodeId, term: Term) -> Self {
        SimulatedCluster {
            truth: Arc::new(Mutex::new(ClusterTruth {
                leader: Some(node),
                term,
            })),
        }
    }

    /// Elect `node` in a new term
    pub fn elect(&self, node: NodeId) -> Term {
        let mut truth = self.truth.lock();
        truth.term = Term(truth.term.0 + 1);
        truth.leader = Some(node);
        truth.term
    }

    /// Start a new term with no leader yet
    pub fn depose(&self) -> Term {
        let mut truth = self.truth.lock();
        truth.term = Term(truth.term.0 + 1);
        truth.leader = None;
        truth.term
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.truth.lock().leader
    }

    pub fn term(&self) -> Term {
        self.truth.lock().term
    }

    fn snapshot(&self) -> (Option<NodeId>, Term) {
        let truth = self.truth.lock();
        (truth.leader, truth.term)
    }
}

/// Fault probabilities for the simulated consensus
#[derive(Debug, Clone)]
pub struct SimulatedConsensusConfig {
    /// Barrier times out without syncing the view
    pub barrier_fail_prob: f64,
    /// This node is deposed while its barrier is in flight
    pub leadership_loss_prob: f64,
    /// Barrier round-trip in microseconds (min, max)
    pub barrier_latency_us: (u64, u64),
}

impl Default for SimulatedConsensusConfig {
    fn default() -> Self {
        SimulatedConsensusConfig {
            barrier_fail_prob: 0.01,
            leadership_loss_prob: 0.005,
            barrier_latency_us: (50, 2_000),
        }
    }
}

impl SimulatedConsensusConfig {
    pub fn no_faults() -> Self {
        SimulatedConsensusConfig {
            barrier_fail_prob: 0.0,
            leadership_loss_prob: 0.0,
            barrier_latency_us: (0, 0),
        }
    }

    pub fn high_chaos() -> Self {
        SimulatedConsensusConfig {
            barrier_fail_prob: 0.05,
            leadership_loss_prob: 0.03,
            barrier_latency_us: (500, 20_000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LocalView {
    is_leader: bool,
    term: Term,
}

/// One node's view of a [`SimulatedCluster`]
pub struct SimulatedConsensus<R: Rng> {
    node_id: NodeId,
    cluster: SimulatedCluster,
    view: Mutex<LocalView>,
    rng: Mutex<R>,
    config: SimulatedConsensusConfig,
    snapshot_path: Option<PathBuf>,
    /// In-memory snapshot; takes precedence over `snapshot_path`
    snapshot_bytes: Mutex<Option<Vec<u8>>>,
    barrier_calls: AtomicU64,
}

impl<R: Rng> SimulatedConsensus<R> {
    /// Node whose local view starts in sync with the cluster
    pub fn new(
        node_id: NodeId,
        cluster: SimulatedCluster,
        rng: R,
        config: SimulatedConsensusConfig,
    ) -> Self {
        let (leader, term) = cluster.snapshot();
        SimulatedConsensus {
            node_id,
            cluster,
            view: Mutex::new(LocalView {
                is_leader: leader == Some(node_id),
                term,
            }),
            rng: Mutex::new(rng),
            config,
            snapshot_path: None,
            snapshot_bytes: Mutex::new(None),
            barrier_calls: AtomicU64::new(0),
        }
    }

    /// Node 0 leading a private cluster in `term`
    pub fn single_leader(term: Term, rng: R, config: SimulatedConsensusConfig) -> Self {
        Self::new(0, SimulatedCluster::with_leader(0, term), rng, config)
    }

    pub fn with_snapshot_path(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    /// Replace the local snapshot with an in-memory one
    pub fn install_snapshot(&self, header: SnapshotHeader, payload: &[u8]) {
        *self.snapshot_bytes.lock() = Some(encode_snapshot(&header, payload));
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn cluster(&self) -> &SimulatedCluster {
        &self.cluster
    }

    /// Deliver the latest leadership notification to this node
    pub fn sync_view(&self) {
        let (leader, term) = self.cluster.snapshot();
        *self.view.lock() = LocalView {
            is_leader: leader == Some(self.node_id),
            term,
        };
    }

    /// Force the local view (tests)
    pub fn set_local_view(&self, is_leader: bool, term: Term) {
        *self.view.lock() = LocalView { is_leader, term };
    }

    pub fn barrier_calls(&self) -> u64 {
        self.barrier_calls.load(Ordering::Relaxed)
    }
}

impl<R: Rng> Consensus for SimulatedConsensus<R> {
    fn is_leader(&self) -> bool {
        self.view.lock().is_leader
    }

    fn current_term(&self) -> Term {
        self.view.lock().term
    }

    fn linearizable_barrier(&self) -> BoxFuture<'_, Result<(), BarrierError>> {
        Box::pin(async move {
            self.barrier_calls.fetch_add(1, Ordering::Relaxed);

            let (fail, lose, latency_us) = {
                let mut rng = self.rng.lock();
                let fail = crate::buggify!(
                    &mut *rng,
                    faults::BARRIER_FAIL,
                    self.config.barrier_fail_prob
                );
                let lose = crate::buggify!(
                    &mut *rng,
                    faults::LEADERSHIP_LOSS_DURING_BARRIER,
                    self.config.leadership_loss_prob
                );
                let (min, max) = self.config.barrier_latency_us;
                (fail, lose, rng.gen_range(min, max))
            };

            if latency_us > 0 {
                tokio::time::sleep(Duration::from_micros(latency_us)).await;
            } else {
                tokio::task::yield_now().await;
            }

            if fail {
                return Err(BarrierError::Timeout);
            }
            if lose && self.cluster.leader() == Some(self.node_id) {
                self.cluster.depose();
            }

            self.sync_view();
            if self.cluster.leader() == Some(self.node_id) && self.current_term() == self.cluster.term() {
                Ok(())
            } else {
                Err(BarrierError::NotLeader)
            }
        })
    }

    fn local_snapshot_path(&self) -> PathBuf {
        self.snapshot_path.clone().unwrap_or_default()
    }

    fn open_local_snapshot(&self) -> BoxFuture<'_, Result<Option<LocalSnapshot>, SnapshotError>> {
        Box::pin(async move {
            let bytes = self.snapshot_bytes.lock().clone();
            match (bytes, &self.snapshot_path) {
                (Some(bytes), _) => LocalSnapshot::from_bytes(self.local_snapshot_path(), bytes)
                    .await
                    .map(Some),
                (None, Some(path)) => LocalSnapshot::open(path).await,
                (None, None) => Ok(None),
            }
        })
    }
}
