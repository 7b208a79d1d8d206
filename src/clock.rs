//! Wall-clock abstraction
//!
//! Manifest upload timestamps come from a [`Clock`] so that simulation runs
//! stamp manifests with controlled, reproducible times.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EpochMillis(pub i64);

impl EpochMillis {
    pub const ZERO: EpochMillis = EpochMillis(0);

    pub fn from_millis(ms: i64) -> Self {
        EpochMillis(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn saturating_sub(&self, other: EpochMillis) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0).max(0) as u64)
    }
}

impl std::ops::Add<Duration> for EpochMillis {
    type Output = EpochMillis;

    fn add(self, rhs: Duration) -> Self::Output {
        EpochMillis(self.0.saturating_add(rhs.as_millis() as i64))
    }
}

impl std::fmt::Display for EpochMillis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Clock trait for wall-clock reads
///
/// Implementations:
/// - `ProductionClock`: real system time
/// - `SimulatedClock`: virtual time for DST
pub trait Clock: Send + Sync + Clone + 'static {
    fn now(&self) -> EpochMillis;
}

/// Production clock anchored to system time at construction
#[derive(Clone)]
pub struct ProductionClock {
    start: Instant,
    start_millis: i64,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        // A clock before the epoch reads as zero rather than aborting the node
        let start_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        ProductionClock {
            start: Instant::now(),
            start_millis,
        }
    }
}

impl Clock for ProductionClock {
    fn now(&self) -> EpochMillis {
        let elapsed = self.start.elapsed().as_millis() as i64;
        EpochMillis(self.start_millis.saturating_add(elapsed))
    }
}

/// Simulated clock; time only moves via `advance()` or `set()`
#[derive(Clone)]
pub struct SimulatedClock {
    time_ms: Arc<AtomicI64>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedClock {
    pub fn new(start_ms: i64) -> Self {
        SimulatedClock {
            time_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.time_ms
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: i64) {
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, time_ms: i64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> EpochMillis {
        EpochMillis(self.time_ms.load(Ordering::SeqCst))
    }
}
