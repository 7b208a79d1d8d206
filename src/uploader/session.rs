//! Session loop: one leadership term's upload activity
//!
//! ```text
//! STARTING -> SYNCING -> CYCLING <-> SLEEPING
//!     \          \          \           \
//!      +----------+----------+-----------+--> STOPPED
//! ```
//!
//! Cycles run strictly one after another. The manifest lives only in this
//! session; a new session always re-downloads the highest version.

use super::bootstrap::sync_or_create;
use super::cycle::{UploadCycle, UploadOutcome};
use super::UploaderContext;
use crate::clock::Clock;
use crate::consensus::{Consensus, Term};
use crate::manifest::ClusterManifest;
use crate::remote::MetadataStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Syncing,
    Cycling,
    Sleeping,
    Stopped,
}

/// How a cancelable wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    TimedOut,
    Cancelled,
}

/// Sleep for `duration` unless `token` fires first
pub async fn sleep_abortable(duration: Duration, token: &CancellationToken) -> SleepOutcome {
    tokio::select! {
        biased;
        _ = token.cancelled() => SleepOutcome::Cancelled,
        _ = tokio::time::sleep(duration) => SleepOutcome::TimedOut,
    }
}

/// Why a session reached STOPPED
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// Node was not leader when the session started
    NotLeader,
    /// Manifest bootstrap failed; the next acquisition retries
    BootstrapFailed(String),
    AuthorityChanged,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub term: Term,
    pub exit: SessionExit,
    pub cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    /// Version committed by the last successful cycle
    pub last_persisted_version: Option<u64>,
}

pub struct SessionLoop<C: Consensus, M: MetadataStore, K: Clock> {
    ctx: Arc<UploaderContext<C, M, K>>,
    term: Term,
    token: CancellationToken,
    state: SessionState,
    manifest: Option<ClusterManifest>,
    report: SessionReport,
}

impl<C: Consensus, M: MetadataStore, K: Clock> SessionLoop<C, M, K> {
    pub fn new(ctx: Arc<UploaderContext<C, M, K>>, term: Term, token: CancellationToken) -> Self {
        SessionLoop {
            ctx,
            term,
            token,
            state: SessionState::Starting,
            manifest: None,
            report: SessionReport {
                term,
                exit: SessionExit::Shutdown,
                cycles: 0,
                successful_cycles: 0,
                failed_cycles: 0,
                last_persisted_version: None,
            },
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(term = %self.term, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    fn stop(mut self, exit: SessionExit) -> SessionReport {
        self.transition(SessionState::Stopped);
        info!(
            cluster = %self.ctx.cluster,
            term = %self.term,
            exit = ?exit,
            cycles = self.report.cycles,
            "Metadata upload session stopped"
        );
        self.report.exit = exit;
        self.report
    }

    /// Drive the session to STOPPED
    pub async fn run(mut self) -> SessionReport {
        let guard = self.ctx.guard();
        loop {
            match self.state {
                SessionState::Starting => {
                    if !self.ctx.consensus.is_leader() || self.ctx.consensus.current_term() != self.term {
                        return self.stop(SessionExit::NotLeader);
                    }
                    info!(cluster = %self.ctx.cluster, term = %self.term, "Starting metadata upload session");
                    self.transition(SessionState::Syncing);
                }
                SessionState::Syncing => {
                    let retry = self.ctx.retry_context(&self.token, self.term.0);
                    match sync_or_create(&*self.ctx.store, &self.ctx.cluster, &retry).await {
                        Ok(manifest) => {
                            self.manifest = Some(manifest);
                            self.transition(SessionState::Cycling);
                        }
                        Err(e) => {
                            if self.token.is_cancelled() {
                                return self.stop(SessionExit::Shutdown);
                            }
                            warn!(
                                cluster = %self.ctx.cluster,
                                term = %self.term,
                                phase = "bootstrap",
                                error = %e,
                                "Failed to download or create cluster manifest"
                            );
                            return self.stop(SessionExit::BootstrapFailed(e.to_string()));
                        }
                    }
                }
                SessionState::Cycling => {
                    if self.token.is_cancelled() {
                        return self.stop(SessionExit::Shutdown);
                    }
                    if guard.has_authority_changed(self.term).await {
                        return self.stop(SessionExit::AuthorityChanged);
                    }

                    let Some(mut manifest) = self.manifest.take() else {
                        // Syncing always stores a manifest before Cycling
                        self.transition(SessionState::Syncing);
                        continue;
                    };
                    self.report.cycles += 1;
                    let retry = self
                        .ctx
                        .retry_context(&self.token, self.term.0.wrapping_mul(31).wrapping_add(self.report.cycles));
                    let outcome = UploadCycle::new(&self.ctx).run(&mut manifest, self.term, &retry).await;
                    match outcome {
                        UploadOutcome::Success => {
                            self.report.successful_cycles += 1;
                            self.report.last_persisted_version = manifest.version;
                        }
                        UploadOutcome::UploadFailed => self.report.failed_cycles += 1,
                        UploadOutcome::AuthorityChanged => {
                            return self.stop(SessionExit::AuthorityChanged);
                        }
                    }
                    self.manifest = Some(manifest);
                    self.transition(SessionState::Sleeping);
                }
                SessionState::Sleeping => {
                    let interval = self.ctx.interval.get();
                    match sleep_abortable(interval, &self.token).await {
                        SleepOutcome::TimedOut => self.transition(SessionState::Cycling),
                        SleepOutcome::Cancelled => return self.stop(SessionExit::Shutdown),
                    }
                }
                SessionState::Stopped => return self.stop(SessionExit::Shutdown),
            }
        }
    }
}
