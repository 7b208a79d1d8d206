//! BUGGIFY - FoundationDB-Style Fault Injection
//!
//! Every remote side effect of the uploader (object store calls, consensus
//! barriers) is a potential fault site in simulation. Decisions are drawn
//! from a caller-supplied [`Rng`](crate::io::Rng), so a seed fully
//! determines which faults fire.
//!
//! ```ignore
//! use crate::buggify::faults::object_store as faults;
//!
//! if buggify!(rng, faults::PUT_FAIL, config.put_fail_prob) {
//!     return Err(IoError::new(ErrorKind::Other, "simulated put failure"));
//! }
//! ```
//!
//! Configuration and statistics are per thread. DST runs on a
//! current-thread runtime, so one run sees exactly its own counters.

pub mod config;
pub mod faults;

pub use config::FaultConfig;

use std::cell::RefCell;
use std::collections::BTreeMap;

/// Check/trigger counters per fault id
#[derive(Debug, Clone, Default)]
pub struct BuggifyStats {
    pub checks: BTreeMap<String, u64>,
    pub triggers: BTreeMap<String, u64>,
}

impl BuggifyStats {
    pub fn triggered(&self, fault_id: &str) -> u64 {
        self.triggers.get(fault_id).copied().unwrap_or(0)
    }

    pub fn total_triggers(&self) -> u64 {
        self.triggers.values().sum()
    }

    /// One `id: triggers/checks` entry per fault that was consulted
    pub fn summary(&self) -> String {
        self.checks
            .iter()
            .map(|(id, checks)| format!("{}: {}/{}", id, self.triggered(id), checks))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Default)]
struct BuggifyContext {
    config: FaultConfig,
    stats: BuggifyStats,
}

thread_local! {
    static BUGGIFY_CONTEXT: RefCell<BuggifyContext> = RefCell::new(BuggifyContext::default());
}

/// Set the buggify configuration for the current thread
pub fn set_config(config: FaultConfig) {
    BUGGIFY_CONTEXT.with(|ctx| ctx.borrow_mut().config = config);
}

pub fn get_stats() -> BuggifyStats {
    BUGGIFY_CONTEXT.with(|ctx| ctx.borrow().stats.clone())
}

pub fn reset_stats() {
    BUGGIFY_CONTEXT.with(|ctx| ctx.borrow_mut().stats = BuggifyStats::default());
}

/// Roll a fault. The thread config may disable it or pin its probability.
#[inline]
pub fn should_buggify<R: crate::io::Rng>(rng: &mut R, fault_id: &str, probability: f64) -> bool {
    BUGGIFY_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        *ctx.stats.checks.entry(fault_id.to_string()).or_insert(0) += 1;

        let prob = ctx.config.resolve(fault_id, probability);
        if prob <= 0.0 {
            return false;
        }

        // Always draw so a fault's position in the stream does not depend on
        // whether an earlier fault was enabled.
        let triggered = (rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0) < prob;
        if triggered {
            *ctx.stats.triggers.entry(fault_id.to_string()).or_insert(0) += 1;
        }
        triggered
    })
}

/// BUGGIFY macro - the main interface for fault injection
#[macro_export]
macro_rules! buggify {
    ($rng:expr, $fault_id:expr, $prob:expr) => {
        $crate::buggify::should_buggify($rng, $fault_id, $prob)
    };
}
