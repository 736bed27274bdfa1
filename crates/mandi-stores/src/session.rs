//! SessionStore - per-session state with run lifecycle
//!
//! All mutations for one session go through that session's mutex, giving the
//! single-writer guarantee; reads clone out a consistent snapshot. Starting
//! a run while another is active cancels the prior run and waits a bounded
//! grace period for it to acknowledge termination.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use mandi_core::stage::StageOutput;
use mandi_core::types::{Run, RunId, Session, SessionId, StageId, StageStatus};

use crate::StoreError;

/// Session store tuning.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// How long `start_run` waits for a cancelled predecessor to terminate.
    pub cancel_grace: Duration,
    /// Sessions idle longer than this are eligible for eviction.
    pub idle_ttl: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_secs(2),
            idle_ttl: Duration::from_secs(1800),
        }
    }
}

struct ActiveRun {
    run: Run,
    cancel: CancellationToken,
    finished_tx: watch::Sender<bool>,
}

struct SessionEntry {
    session: Session,
    active: Option<ActiveRun>,
    last_run: Option<Run>,
}

impl SessionEntry {
    fn new(id: &str) -> Self {
        Self {
            session: Session::new(id),
            active: None,
            last_run: None,
        }
    }

    fn current_run_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.run.run_id.as_str())
    }
}

/// Per-session single-writer state store.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionEntry>>>>,
    config: SessionStoreConfig,
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    async fn entry(&self, session_id: &str) -> Arc<Mutex<SessionEntry>> {
        if let Some(entry) = self.sessions.read().await.get(session_id) {
            return entry.clone();
        }
        let mut guard = self.sessions.write().await;
        guard
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionEntry::new(session_id))))
            .clone()
    }

    async fn existing_entry(&self, session_id: &str) -> Option<Arc<Mutex<SessionEntry>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Atomically fetch or create a session, returning a snapshot.
    pub async fn get_or_create(&self, session_id: &str) -> Session {
        let entry = self.entry(session_id).await;
        let guard = entry.lock().await;
        guard.session.clone()
    }

    /// Snapshot of an existing session, if any.
    pub async fn session(&self, session_id: &str) -> Option<Session> {
        let entry = self.existing_entry(session_id).await?;
        let guard = entry.lock().await;
        Some(guard.session.clone())
    }

    /// Start a new run for a session, cancelling any active one first.
    ///
    /// The prior run gets `cancel_requested` plus a token cancellation, then
    /// a bounded grace wait for its executor to call `finish_run`. The new
    /// run's cancellation token is returned alongside the run snapshot.
    pub async fn start_run(
        &self,
        session_id: &str,
        request_text: &str,
    ) -> (Run, CancellationToken) {
        let entry = self.entry(session_id).await;

        // Cancel the predecessor outside the entry lock so its executor can
        // reach finish_run.
        let waiter = {
            let mut guard = entry.lock().await;
            guard.active.as_mut().map(|active| {
                active.run.cancel_requested = true;
                active.cancel.cancel();
                active.finished_tx.subscribe()
            })
        };
        if let Some(mut finished) = waiter {
            let wait = async {
                while !*finished.borrow() {
                    if finished.changed().await.is_err() {
                        break;
                    }
                }
            };
            if tokio::time::timeout(self.config.cancel_grace, wait)
                .await
                .is_err()
            {
                tracing::warn!(
                    session_id = %session_id,
                    "cancelled run did not terminate within grace period"
                );
            }
        }

        let mut guard = entry.lock().await;
        if let Some(stale) = guard.active.take() {
            guard.last_run = Some(stale.run);
        }
        guard.session.begin_turn(request_text);

        let run = Run::new(session_id);
        let cancel = CancellationToken::new();
        let (finished_tx, _) = watch::channel(false);
        guard.active = Some(ActiveRun {
            run: run.clone(),
            cancel: cancel.clone(),
            finished_tx,
        });
        (run, cancel)
    }

    /// Record a stage transition. A stale `run_id` is a silent no-op.
    pub async fn update_stage(
        &self,
        session_id: &str,
        run_id: &str,
        stage_id: StageId,
        status: StageStatus,
        message: Option<String>,
    ) {
        let Some(entry) = self.existing_entry(session_id).await else {
            return;
        };
        let mut guard = entry.lock().await;
        if guard.current_run_id() != Some(run_id) {
            return;
        }
        if let Some(active) = guard.active.as_mut() {
            active.run.record_stage(stage_id, status, message);
        }
        guard.session.touch();
        if status == StageStatus::Processing {
            guard.session.current_stage = Some(stage_id);
        }
    }

    /// Mirror a completed stage output into the stored session.
    pub async fn apply_output(
        &self,
        session_id: &str,
        run_id: &str,
        stage_id: StageId,
        output: StageOutput,
    ) {
        let Some(entry) = self.existing_entry(session_id).await else {
            return;
        };
        let mut guard = entry.lock().await;
        if guard.current_run_id() != Some(run_id) {
            return;
        }
        guard.session.apply_output(stage_id, output);
    }

    /// Replace the stored session with the engine's working copy.
    ///
    /// The pipeline engine owns the working session for the duration of a
    /// run; this mirrors it back after each completed stage. Stale run ids
    /// are silent no-ops so a superseded run can never clobber its
    /// successor's state.
    pub async fn commit_session(&self, session_id: &str, run_id: &str, session: Session) {
        let Some(entry) = self.existing_entry(session_id).await else {
            return;
        };
        let mut guard = entry.lock().await;
        if guard.current_run_id() != Some(run_id) {
            return;
        }
        guard.session = session;
    }

    /// Flag whether the current run is blocked on user confirmation.
    pub async fn set_awaiting_confirmation(
        &self,
        session_id: &str,
        run_id: &str,
        awaiting: bool,
    ) {
        let Some(entry) = self.existing_entry(session_id).await else {
            return;
        };
        let mut guard = entry.lock().await;
        if guard.current_run_id() != Some(run_id) {
            return;
        }
        if let Some(active) = guard.active.as_mut() {
            active.run.awaiting_confirmation = awaiting;
        }
    }

    /// Mark the run finished and release waiters. Stale run ids are no-ops.
    pub async fn finish_run(&self, session_id: &str, run_id: &str) {
        let Some(entry) = self.existing_entry(session_id).await else {
            return;
        };
        let mut guard = entry.lock().await;
        if guard.current_run_id() != Some(run_id) {
            return;
        }
        if let Some(active) = guard.active.take() {
            let _ = active.finished_tx.send(true);
            guard.last_run = Some(active.run);
        }
        guard.session.touch();
    }

    /// Request cancellation of the active run. Returns false when idle.
    pub async fn cancel_run(&self, session_id: &str) -> bool {
        let Some(entry) = self.existing_entry(session_id).await else {
            return false;
        };
        let mut guard = entry.lock().await;
        match guard.active.as_mut() {
            Some(active) => {
                active.run.cancel_requested = true;
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the active run's bookkeeping.
    pub async fn active_run(&self, session_id: &str) -> Option<Run> {
        let entry = self.existing_entry(session_id).await?;
        let guard = entry.lock().await;
        guard.active.as_ref().map(|a| a.run.clone())
    }

    /// Most recent finished run, for post-mortem inspection.
    pub async fn last_run(&self, session_id: &str) -> Option<Run> {
        let entry = self.existing_entry(session_id).await?;
        let guard = entry.lock().await;
        guard.last_run.clone()
    }

    /// Serialize a session to a stable blob.
    ///
    /// Only completed stage outputs live on the session, so a snapshot never
    /// captures in-flight work; restoring yields a session whose next run
    /// starts every stage idle.
    pub async fn snapshot(&self, session_id: &str) -> Result<Vec<u8>, StoreError> {
        let session = self
            .session(session_id)
            .await
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        Ok(serde_json::to_vec(&session)?)
    }

    /// Rebuild a session from a snapshot blob, replacing any in-memory one.
    pub async fn restore(&self, blob: &[u8]) -> Result<Session, StoreError> {
        let session: Session = serde_json::from_slice(blob)?;
        let entry = self.entry(&session.id).await;
        let mut guard = entry.lock().await;
        guard.session = session.clone();
        guard.active = None;
        Ok(session)
    }

    /// Drop sessions idle past the configured TTL. Sessions with an active
    /// run are never evicted. Returns the evicted session ids.
    pub async fn evict_idle(&self) -> Vec<SessionId> {
        let ttl = chrono::Duration::from_std(self.config.idle_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(1800));
        let cutoff = Utc::now() - ttl;

        let candidates: Vec<(SessionId, Arc<Mutex<SessionEntry>>)> = {
            let guard = self.sessions.read().await;
            guard
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect()
        };

        let mut evicted = Vec::new();
        for (id, entry) in candidates {
            let expired = {
                let guard = entry.lock().await;
                guard.active.is_none() && guard.session.last_updated < cutoff
            };
            if expired {
                self.sessions.write().await.remove(&id);
                evicted.push(id);
            }
        }
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "evicted idle sessions");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Run ids currently active, for diagnostics.
    pub async fn active_run_ids(&self) -> Vec<RunId> {
        let entries: Vec<Arc<Mutex<SessionEntry>>> =
            self.sessions.read().await.values().cloned().collect();
        let mut ids = Vec::new();
        for entry in entries {
            let guard = entry.lock().await;
            if let Some(active) = &guard.active {
                ids.push(active.run.run_id.clone());
            }
        }
        ids
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionStoreConfig::default())
    }
}
