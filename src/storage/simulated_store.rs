//! Simulated Object Store with Fault Injection
//!
//! DST-compatible wrapper that injects faults using buggify. Every decision
//! comes from the seeded RNG, so a run is reproducible from its seed.

use crate::buggify::faults::object_store as faults;
use crate::io::Rng;
use crate::storage::{ListResult, ObjectStore};
use parking_lot::Mutex;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of PUT operation failure (nothing written)
    pub put_fail_prob: f64,
    /// Probability that a PUT is written but reported as failed
    pub put_lost_ack_prob: f64,
    /// Probability of GET operation failure
    pub get_fail_prob: f64,
    /// Probability of DELETE failure
    pub delete_fail_prob: f64,
    /// Probability of LIST failure
    pub list_fail_prob: f64,
    /// Probability of operation timeout
    pub timeout_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.01,             // 1%
            put_lost_ack_prob: 0.005,        // 0.5%
            get_fail_prob: 0.01,             // 1%
            delete_fail_prob: 0.01,          // 1%
            list_fail_prob: 0.01,            // 1%
            timeout_prob: 0.005,             // 0.5%
            latency_range_us: (100, 10_000), // 0.1ms - 10ms
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.05,
            put_lost_ack_prob: 0.02,
            get_fail_prob: 0.05,
            delete_fail_prob: 0.10,
            list_fail_prob: 0.05,
            timeout_prob: 0.02,
            latency_range_us: (1_000, 100_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.0,
            put_lost_ack_prob: 0.0,
            get_fail_prob: 0.0,
            delete_fail_prob: 0.0,
            list_fail_prob: 0.0,
            timeout_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub put_attempts: u64,
    pub put_failures: u64,
    pub put_lost_acks: u64,
    pub get_attempts: u64,
    pub get_failures: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub list_attempts: u64,
    pub list_failures: u64,
    pub timeouts: u64,
}

struct SimulatedStoreInner<R: Rng> {
    rng: R,
    stats: SimulatedStoreStats,
}

/// Simulated object store that wraps another store and injects faults
pub struct SimulatedObjectStore<S: ObjectStore + Clone, R: Rng> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner<R>>>,
}

impl<S: ObjectStore + Clone, R: Rng> Clone for SimulatedObjectStore<S, R> {
    fn clone(&self) -> Self {
        SimulatedObjectStore {
            inner_store: self.inner_store.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: ObjectStore + Clone, R: Rng> SimulatedObjectStore<S, R> {
    pub fn new(inner_store: S, rng: R, config: SimulatedStoreConfig) -> Self {
        SimulatedObjectStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng,
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// The wrapped store (bypasses fault injection)
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    fn check(&self, fault_id: &str, probability: f64) -> bool {
        let mut s = self.state.lock();
        crate::buggify!(&mut s.rng, fault_id, probability)
    }

    /// Common prologue: timeout check, then simulated latency
    async fn prologue(&self) -> IoResult<()> {
        if self.check(faults::TIMEOUT, self.config.timeout_prob) {
            self.state.lock().stats.timeouts += 1;
            return Err(IoError::new(ErrorKind::TimedOut, "simulated timeout"));
        }

        let (min, max) = self.config.latency_range_us;
        if min > 0 || max > 0 {
            let latency_us = {
                let mut s = self.state.lock();
                if max > min {
                    s.rng.gen_range(min, max)
                } else {
                    min
                }
            };
            if latency_us > 0 {
                tokio::time::sleep(Duration::from_micros(latency_us)).await;
            }
        }
        Ok(())
    }
}

impl<S: ObjectStore + Clone, R: Rng> ObjectStore for SimulatedObjectStore<S, R> {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().stats.put_attempts += 1;
            self.prologue().await?;

            if self.check(faults::PUT_FAIL, self.config.put_fail_prob) {
                self.state.lock().stats.put_failures += 1;
                return Err(IoError::new(ErrorKind::Other, "simulated put failure"));
            }

            self.inner_store.put(key, data).await?;

            if self.check(faults::PUT_LOST_ACK, self.config.put_lost_ack_prob) {
                self.state.lock().stats.put_lost_acks += 1;
                return Err(IoError::new(
                    ErrorKind::TimedOut,
                    "simulated lost put acknowledgement",
                ));
            }
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().stats.get_attempts += 1;
            self.prologue().await?;

            if self.check(faults::GET_FAIL, self.config.get_fail_prob) {
                self.state.lock().stats.get_failures += 1;
                return Err(IoError::new(ErrorKind::Other, "simulated get failure"));
            }

            self.inner_store.get(key).await
        })
    }

    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move { self.inner_store.exists(key).await })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().stats.delete_attempts += 1;
            self.prologue().await?;

            if self.check(faults::DELETE_FAIL, self.config.delete_fail_prob) {
                self.state.lock().stats.delete_failures += 1;
                return Err(IoError::new(ErrorKind::Other, "simulated delete failure"));
            }

            self.inner_store.delete(key).await
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().stats.list_attempts += 1;
            self.prologue().await?;

            if self.check(faults::LIST_FAIL, self.config.list_fail_prob) {
                self.state.lock().stats.list_failures += 1;
                return Err(IoError::new(ErrorKind::Other, "simulated list failure"));
            }

            self.inner_store.list(prefix, continuation_token).await
        })
    }
}
