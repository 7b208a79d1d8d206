//! Uploader service: leadership callbacks and shutdown
//!
//! At most one session runs per node. Sessions are spawned on a
//! [`TaskTracker`] so shutdown can wait for the in-flight cycle, and each one
//! gets a child of the service's root [`CancellationToken`].

use super::session::{sleep_abortable, SessionLoop, SessionReport, SleepOutcome};
use super::UploaderContext;
use crate::clock::Clock;
use crate::consensus::{Consensus, Term};
use crate::remote::MetadataStore;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

struct ActiveSession {
    term: Term,
    token: CancellationToken,
    handle: JoinHandle<SessionReport>,
}

pub struct UploaderService<C: Consensus, M: MetadataStore, K: Clock> {
    ctx: Arc<UploaderContext<C, M, K>>,
    root: CancellationToken,
    tracker: TaskTracker,
    active: Mutex<Option<ActiveSession>>,
    finished: SyncMutex<Vec<SessionReport>>,
}

impl<C: Consensus, M: MetadataStore, K: Clock> UploaderService<C, M, K> {
    pub fn new(ctx: UploaderContext<C, M, K>) -> Self {
        UploaderService {
            ctx: Arc::new(ctx),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            active: Mutex::new(None),
            finished: SyncMutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<UploaderContext<C, M, K>> {
        &self.ctx
    }

    /// Term of the session that is currently running, if any
    pub async fn active_term(&self) -> Option<Term> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.handle.is_finished())
            .map(|s| s.term)
    }

    /// Reports of sessions that have been joined, oldest first
    pub fn take_reports(&self) -> Vec<SessionReport> {
        std::mem::take(&mut *self.finished.lock())
    }

    async fn join(&self, session: ActiveSession) -> Option<SessionReport> {
        session.token.cancel();
        match session.handle.await {
            Ok(report) => {
                self.finished.lock().push(report.clone());
                Some(report)
            }
            Err(e) => {
                error!(term = %session.term, error = %e, "Metadata upload session task failed");
                None
            }
        }
    }

    /// Start a session for `term`
    ///
    /// A session still running for a different term is stopped and awaited
    /// first. Returns false if a session for `term` is already running or
    /// the service is shutting down.
    pub async fn on_leadership_acquired(&self, term: Term) -> bool {
        let mut active = self.active.lock().await;
        if self.root.is_cancelled() {
            return false;
        }
        if let Some(session) = active.as_ref() {
            if session.term == term && !session.handle.is_finished() {
                return false;
            }
        }
        if let Some(previous) = active.take() {
            self.join(previous).await;
        }

        let token = self.root.child_token();
        let session = SessionLoop::new(self.ctx.clone(), term, token.clone());
        let handle = self.tracker.spawn(session.run());
        info!(cluster = %self.ctx.cluster, term = %term, "Leadership acquired, session spawned");
        *active = Some(ActiveSession {
            term,
            token,
            handle,
        });
        true
    }

    /// Keep a session running for a term this node holds indefinitely
    ///
    /// Re-acquires `term` once per upload interval until `shutdown` fires. A
    /// session that ended on its own (a failed bootstrap, say) is replaced;
    /// a running one is left alone.
    pub async fn lead_until_shutdown(&self, term: Term, shutdown: &CancellationToken) {
        loop {
            if self.on_leadership_acquired(term).await {
                debug!(cluster = %self.ctx.cluster, term = %term, "Session (re)started");
            }
            if sleep_abortable(self.ctx.interval.get(), shutdown).await == SleepOutcome::Cancelled {
                return;
            }
        }
    }

    /// Cancel the current session and wait for it to finish
    pub async fn on_leadership_lost(&self) -> Option<SessionReport> {
        let session = self.active.lock().await.take()?;
        info!(cluster = %self.ctx.cluster, term = %session.term, "Leadership lost, stopping session");
        self.join(session).await
    }

    /// Cancel everything and wait for all session tasks
    pub async fn stop_and_wait(&self) -> Option<SessionReport> {
        self.root.cancel();
        self.tracker.close();
        let session = self.active.lock().await.take();
        let report = match session {
            Some(session) => self.join(session).await,
            None => None,
        };
        self.tracker.wait().await;
        info!(cluster = %self.ctx.cluster, "Metadata uploader stopped");
        report
    }
}
