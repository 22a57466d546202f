//! Bulk sync sessions.
//!
//! A session imports every remote record under one filter key: it pages
//! through the remote listing, maps and upserts each shipment, persists the
//! running counters after every page and finalizes against the configured
//! error ceiling. At most one session per filter key may be in progress;
//! conflicting starts fail fast.
//!
//! Sessions run on their own tokio task. Progress is read from the store, so
//! readers see the last persisted snapshot, at most one page behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use shipsync_core::{
    now_millis, FilterKey, SessionId, SessionStatus, SyncSession, UnitOutcome, CANCELLED_REASON,
    INTERRUPTED_REASON,
};
use shipsync_store::{BeginResult, RecordRepository, SessionStore};

use crate::config::SessionConfig;
use crate::error::{Result, SyncError};
use crate::ingest::Ingestor;
use crate::mapper::RecordMapper;
use crate::retry::RetryExecutor;
use crate::source::RemoteSyncSource;
use crate::MONITORING_TARGET;

/// Orchestrates bulk sync sessions.
///
/// Cheap to clone; clones share the same set of running sessions.
pub struct SyncSessionManager<S, R> {
    inner: Arc<ManagerInner<S, R>>,
}

struct ManagerInner<S, R> {
    store: Arc<S>,
    source: Arc<R>,
    ingestor: Ingestor<S>,
    config: SessionConfig,
    /// Cancellation flags of sessions driven by this process.
    active: Mutex<HashMap<SessionId, Arc<AtomicBool>>>,
}

impl<S, R> Clone for SyncSessionManager<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, R> SyncSessionManager<S, R>
where
    S: SessionStore + RecordRepository + 'static,
    R: RemoteSyncSource + 'static,
{
    pub fn new(store: Arc<S>, source: Arc<R>, mapper: RecordMapper, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                ingestor: Ingestor::new(Arc::clone(&store), mapper),
                store,
                source,
                config,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a session for `filter_key` in the background.
    ///
    /// Fails with [`SyncError::SessionConflict`] if one is already in progress.
    pub async fn start(&self, filter_key: FilterKey) -> Result<SessionId> {
        let session = self.begin(filter_key).await?;
        let id = session.id;

        let manager = self.clone();
        tokio::spawn(async move {
            manager.drive(session).await;
        });

        Ok(id)
    }

    /// Run a session for `filter_key` to completion on the current task.
    pub async fn run(&self, filter_key: FilterKey) -> Result<SyncSession> {
        let session = self.begin(filter_key).await?;
        Ok(self.drive(session).await)
    }

    /// Latest persisted snapshot of a session.
    pub async fn get_progress(&self, id: &SessionId) -> Result<SyncSession> {
        self.inner
            .store
            .get_session(id)
            .await?
            .ok_or(SyncError::SessionNotFound(*id))
    }

    /// Past and running sessions, newest first.
    pub async fn list_sessions(
        &self,
        filter_key: Option<&FilterKey>,
        limit: usize,
    ) -> Result<Vec<SyncSession>> {
        Ok(self.inner.store.list_sessions(filter_key, limit).await?)
    }

    /// Request cancellation.
    ///
    /// The running page completes; later pages are skipped and the session
    /// fails with reason `cancelled`. Returns `false` if the session already
    /// finished or cancellation was already requested.
    ///
    /// The flag is checked between pages only. A request that arrives while
    /// the last page is applied skips nothing, and the session still
    /// finalizes against the error ceiling as `completed` or `failed`.
    pub async fn cancel(&self, id: &SessionId) -> Result<bool> {
        let mut session = self.get_progress(id).await?;
        if session.is_terminal() {
            return Ok(false);
        }

        let flag = self.active().get(id).cloned();
        match flag {
            Some(flag) => {
                let already = flag.swap(true, Ordering::SeqCst);
                if !already {
                    info!(session_id = %id, filter_key = %session.filter_key, "sync session cancellation requested");
                }
                Ok(!already)
            }
            None => {
                // Not driven by this process: finalize the row directly.
                session.fail(CANCELLED_REASON, now_millis())?;
                self.inner.store.save_session(&session).await?;
                info!(session_id = %id, filter_key = %session.filter_key, "orphaned sync session cancelled");
                Ok(true)
            }
        }
    }

    /// Fail sessions left `in_progress` by a previous process.
    ///
    /// Their filter keys become available again.
    pub async fn recover_interrupted(&self) -> Result<Vec<SyncSession>> {
        let running = self.inner.store.list_running_sessions().await?;
        let mut recovered = Vec::new();

        for mut session in running {
            if self.active().contains_key(&session.id) {
                continue;
            }
            session.fail(INTERRUPTED_REASON, now_millis())?;
            self.inner.store.save_session(&session).await?;
            warn!(
                session_id = %session.id,
                filter_key = %session.filter_key,
                processed = session.processed_units,
                "recovered interrupted sync session"
            );
            recovered.push(session);
        }

        Ok(recovered)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session driver
    // ─────────────────────────────────────────────────────────────────────────

    fn active(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<AtomicBool>>> {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn begin(&self, filter_key: FilterKey) -> Result<SyncSession> {
        let now = now_millis();
        let mut session = SyncSession::new(SessionId::generate(), filter_key, now);
        session.begin(now)?;

        // Registered before the row is visible so recovery never claims it.
        let flag = Arc::new(AtomicBool::new(false));
        self.active().insert(session.id, flag);

        let begun = match self.inner.store.begin_session(&session).await {
            Ok(begun) => begun,
            Err(e) => {
                self.active().remove(&session.id);
                return Err(e.into());
            }
        };

        if let BeginResult::Conflict { existing } = begun {
            self.active().remove(&session.id);
            warn!(
                filter_key = %session.filter_key,
                existing = %existing,
                "sync session already in progress"
            );
            return Err(SyncError::SessionConflict {
                filter_key: session.filter_key,
                existing,
            });
        }

        info!(session_id = %session.id, filter_key = %session.filter_key, "sync session started");
        Ok(session)
    }

    async fn drive(&self, mut session: SyncSession) -> SyncSession {
        let cancel = self.active().get(&session.id).cloned().unwrap_or_default();
        let retry = RetryExecutor::new(self.inner.config.retry, self.inner.config.remote_timeout());
        let source = &*self.inner.source;
        let mut page_token: Option<String> = None;

        loop {
            if cancel.load(Ordering::SeqCst) {
                info!(
                    session_id = %session.id,
                    processed = session.processed_units,
                    "sync session cancelled"
                );
                self.abort(&mut session, CANCELLED_REASON.to_string(), &retry).await;
                break;
            }

            let filter_key = &session.filter_key;
            let token = page_token.as_deref();
            let fetched = retry
                .run("list_since", || async move { source.list_since(filter_key, token).await })
                .await;

            let page = match fetched {
                Ok(page) => page,
                Err(e) => {
                    error!(
                        target: MONITORING_TARGET,
                        session_id = %session.id,
                        filter_key = %session.filter_key,
                        error = %e,
                        "sync session aborted: remote listing failed"
                    );
                    self.abort(&mut session, e.to_string(), &retry).await;
                    break;
                }
            };

            session.observe_page(page.records.len() as u64, page.total_hint);

            for record in &page.records {
                match self.inner.ingestor.apply(record, &retry).await {
                    Ok(outcome) => session.record_unit(outcome.into()),
                    Err(e) => {
                        warn!(
                            session_id = %session.id,
                            external_id = %record.external_id,
                            error = %e,
                            "failed to apply remote record"
                        );
                        let message = match e {
                            SyncError::Mapping { .. } => e.to_string(),
                            _ => format!("{}: {}", record.external_id, e),
                        };
                        session.record_unit(UnitOutcome::Failed { message });
                    }
                }
            }

            self.persist(&session, &retry).await;
            debug!(
                session_id = %session.id,
                processed = session.processed_units,
                total = session.total_units,
                errors = session.error_count,
                "page applied"
            );

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => {
                    self.complete(&mut session, &retry).await;
                    break;
                }
            }
        }

        self.active().remove(&session.id);
        session
    }

    async fn complete(&self, session: &mut SyncSession, retry: &RetryExecutor) {
        if let Err(e) = session.complete(self.inner.config.error_ceiling, now_millis()) {
            error!(session_id = %session.id, error = %e, "cannot finalize sync session");
            return;
        }
        if !self.persist(session, retry).await {
            self.report_unsaved_outcome(session);
        }

        if session.status == SessionStatus::Completed {
            info!(
                session_id = %session.id,
                filter_key = %session.filter_key,
                processed = session.processed_units,
                created = session.created_records,
                updated = session.updated_records,
                errors = session.error_count,
                "sync session completed"
            );
        } else {
            error!(
                target: MONITORING_TARGET,
                session_id = %session.id,
                filter_key = %session.filter_key,
                errors = session.error_count,
                last_error = session.last_error.as_deref().unwrap_or_default(),
                "sync session failed: error ceiling reached"
            );
        }
    }

    async fn abort(&self, session: &mut SyncSession, reason: String, retry: &RetryExecutor) {
        if let Err(e) = session.fail(reason, now_millis()) {
            error!(session_id = %session.id, error = %e, "cannot fail sync session");
            return;
        }
        if !self.persist(session, retry).await {
            self.report_unsaved_outcome(session);
        }
    }

    /// Save a snapshot under the session's retry budget. Returns whether it
    /// was stored.
    async fn persist(&self, session: &SyncSession, retry: &RetryExecutor) -> bool {
        let store = &*self.inner.store;
        let saved = retry
            .run("save_session", || async move {
                store.save_session(session).await.map_err(SyncError::from)
            })
            .await;

        match saved {
            Ok(()) => true,
            Err(e) => {
                error!(
                    target: MONITORING_TARGET,
                    session_id = %session.id,
                    error = %e,
                    "failed to persist sync session"
                );
                false
            }
        }
    }

    /// The stored row is still `in_progress`; `recover_interrupted` releases it.
    fn report_unsaved_outcome(&self, session: &SyncSession) {
        error!(
            target: MONITORING_TARGET,
            session_id = %session.id,
            filter_key = %session.filter_key,
            status = %session.status,
            last_error = session.last_error.as_deref().unwrap_or_default(),
            "final sync session state not stored, row left in progress until recovered"
        );
    }
}
