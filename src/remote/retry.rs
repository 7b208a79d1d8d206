//! Retry context
//!
//! Bounded-deadline, backoff-governed wrapper for a single remote operation.
//! One context is bound per cycle (and one for bootstrap); every operation in
//! that cycle shares its deadline and abort token.
//!
//! - Backoff doubles from `initial_backoff` up to `max_backoff`, with jitter.
//! - `NotFound` is returned immediately, never retried.
//! - The abort token interrupts both in-flight attempts and backoff sleeps.
//! - A lazy abort source, when given, is polled during both as well.

use super::abort::{LazyAbortSource, LAZY_ABORT_POLL_INTERVAL};
use super::error::StoreError;
use crate::config::RetryConfig;
use parking_lot::Mutex;
use rand::{Rng as _, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::io::{ErrorKind, Result as IoResult};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_JITTER: f64 = 0.2;

pub struct RetryContext {
    abort: CancellationToken,
    deadline: Instant,
    initial_backoff: Duration,
    max_backoff: Duration,
    jitter_fraction: f64,
    jitter: Mutex<ChaCha8Rng>,
}

impl RetryContext {
    /// Context whose deadline is `budget` from now
    pub fn new(budget: Duration, retry: &RetryConfig, abort: CancellationToken) -> Self {
        RetryContext {
            abort,
            deadline: Instant::now() + budget,
            initial_backoff: retry.initial_backoff,
            max_backoff: retry.max_backoff.max(retry.initial_backoff),
            jitter_fraction: DEFAULT_JITTER,
            jitter: Mutex::new(ChaCha8Rng::from_entropy()),
        }
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Seed the jitter source (simulation runs)
    pub fn with_jitter_seed(self, seed: u64) -> Self {
        *self.jitter.lock() = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Delay before retry number `attempt` (1-based)
    fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let raw = self
            .initial_backoff
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);
        if raw.is_zero() || self.jitter_fraction <= 0.0 {
            return raw;
        }
        let factor = self
            .jitter
            .lock()
            .gen_range((1.0 - self.jitter_fraction)..=(1.0 + self.jitter_fraction));
        raw.mul_f64(factor)
    }

    /// Run `attempt` until it succeeds, fails terminally, or the budget ends
    pub async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        lazy_abort: Option<&LazyAbortSource>,
        mut attempt: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IoResult<T>>,
    {
        let mut attempts = 0u32;
        loop {
            if self.abort.is_cancelled() {
                return Err(StoreError::Cancelled(format!("{} aborted by shutdown", op)));
            }
            if let Some(reason) = lazy_abort.and_then(|l| l.abort_reason()) {
                return Err(StoreError::Cancelled(reason));
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = self.abort.cancelled() => {
                    return Err(StoreError::Cancelled(format!("{} aborted by shutdown", op)));
                }
                reason = lazy_tripped(lazy_abort) => {
                    warn!(op, attempts, reason = %reason, "Abandoning in-flight attempt");
                    return Err(StoreError::Cancelled(reason));
                }
                r = attempt() => r,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StoreError::NotFound(e.to_string()));
                }
                Err(e) => e,
            };

            let delay = self.backoff_for(attempts);
            if Instant::now() + delay >= self.deadline {
                warn!(op, attempts, error = %err, "Retry budget exhausted");
                return Err(StoreError::DeadlineExceeded { op, attempts });
            }
            debug!(op, attempts, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");

            tokio::select! {
                biased;
                _ = self.abort.cancelled() => {
                    return Err(StoreError::Cancelled(format!("{} aborted by shutdown", op)));
                }
                reason = lazy_tripped(lazy_abort) => return Err(StoreError::Cancelled(reason)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn lazy_tripped(lazy_abort: Option<&LazyAbortSource>) -> String {
    match lazy_abort {
        Some(lazy) => lazy.tripped(LAZY_ABORT_POLL_INTERVAL).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for RetryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryContext")
            .field("remaining", &self.remaining())
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .finish()
    }
}
