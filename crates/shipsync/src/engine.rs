//! The Engine: unified API for the shipsync system.
//!
//! The Engine wires the store, the remote source, bulk sessions, auto-sync,
//! reconciliation and rate limiting into the operations the surrounding
//! application calls.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use shipsync_core::{
    AutoSyncConfig, AutoSyncConfigUpdate, FilterKey, RateLimitDecision, ReconciliationReport,
    SessionId, SyncSession,
};
use shipsync_reconcile::ReconciliationService;
use shipsync_store::{SqliteStore, Store};
use shipsync_sync::{
    AutoSyncSettings, AutoSyncTrigger, Dispatch, NameAddressMatcher, ParentMatcher, RecordMapper,
    RemoteSyncSource, StatusChangeEvent, SyncSessionManager,
};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::rate_limit::RateLimiter;

/// The main Engine struct.
///
/// Provides a unified API for:
/// - Starting, observing and cancelling bulk sync sessions
/// - Reading and updating the auto-sync configuration
/// - Dispatching status-change events to auto-sync
/// - Running reconciliation audits
/// - Rate limiting sensitive operations
pub struct Engine<S, R> {
    store: Arc<S>,
    source: Arc<R>,
    config: EngineConfig,
    sessions: SyncSessionManager<S, R>,
    settings: Arc<AutoSyncSettings<S>>,
    trigger: AutoSyncTrigger<S, R>,
    reconciliation: ReconciliationService<S>,
    rate_limiter: RateLimiter<S>,
}

impl<R: RemoteSyncSource + 'static> Engine<SqliteStore, R> {
    /// Open (or create) a SQLite-backed engine at `path`.
    pub fn open(path: impl AsRef<Path>, source: R, config: EngineConfig) -> Result<Self> {
        let store = SqliteStore::open(path)?;
        Self::new(store, source, config)
    }
}

impl<S, R> Engine<S, R>
where
    S: Store + 'static,
    R: RemoteSyncSource + 'static,
{
    /// Create an engine using the default name+address parent matcher.
    pub fn new(store: S, source: R, config: EngineConfig) -> Result<Self> {
        Self::with_matcher(store, source, Arc::new(NameAddressMatcher), config)
    }

    /// Create an engine with a custom heuristic parent matcher.
    pub fn with_matcher(
        store: S,
        source: R,
        matcher: Arc<dyn ParentMatcher>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::from_shared(Arc::new(store), Arc::new(source), matcher, config)
    }

    /// Create an engine over a store and source the caller keeps handles to.
    pub fn from_shared(
        store: Arc<S>,
        source: Arc<R>,
        matcher: Arc<dyn ParentMatcher>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mapper = RecordMapper::new(matcher);
        let settings = Arc::new(AutoSyncSettings::new(Arc::clone(&store)));

        Ok(Self {
            sessions: SyncSessionManager::new(
                Arc::clone(&store),
                Arc::clone(&source),
                mapper.clone(),
                config.session.clone(),
            ),
            trigger: AutoSyncTrigger::new(
                Arc::clone(&store),
                Arc::clone(&source),
                Arc::clone(&settings),
                mapper,
                config.auto_sync.clone(),
            ),
            reconciliation: ReconciliationService::new(Arc::clone(&store)),
            rate_limiter: RateLimiter::new(Arc::clone(&store), config.rate_limit.clone()),
            settings,
            store,
            source,
            config,
        })
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the remote source reference.
    pub fn source(&self) -> &R {
        &self.source
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a bulk sync session in the background.
    ///
    /// Fails with a session conflict if one already runs for `filter_key`.
    pub async fn start_session(&self, filter_key: impl Into<FilterKey>) -> Result<SessionId> {
        Ok(self.sessions.start(filter_key.into()).await?)
    }

    /// Run a bulk sync session to completion and return its final state.
    pub async fn run_session(&self, filter_key: impl Into<FilterKey>) -> Result<SyncSession> {
        Ok(self.sessions.run(filter_key.into()).await?)
    }

    /// Latest persisted snapshot of a session. Safe to poll.
    pub async fn get_progress(&self, id: &SessionId) -> Result<SyncSession> {
        Ok(self.sessions.get_progress(id).await?)
    }

    /// Request cancellation; see [`SyncSessionManager::cancel`].
    pub async fn cancel_session(&self, id: &SessionId) -> Result<bool> {
        Ok(self.sessions.cancel(id).await?)
    }

    /// Session history, newest first.
    pub async fn list_sessions(
        &self,
        filter_key: Option<&FilterKey>,
        limit: usize,
    ) -> Result<Vec<SyncSession>> {
        Ok(self.sessions.list_sessions(filter_key, limit).await?)
    }

    /// Fail sessions a previous process left running. Call once at startup.
    pub async fn recover_interrupted(&self) -> Result<Vec<SyncSession>> {
        let recovered = self.sessions.recover_interrupted().await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "interrupted sync sessions recovered");
        }
        Ok(recovered)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Auto-sync
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_auto_sync_config(&self) -> Result<AutoSyncConfig> {
        Ok(self.settings.get().await?)
    }

    /// Apply a partial update; unset fields keep their current value.
    pub async fn update_auto_sync_config(
        &self,
        update: &AutoSyncConfigUpdate,
    ) -> Result<AutoSyncConfig> {
        Ok(self.settings.update(update).await?)
    }

    /// Drop the cached configuration and read it from the store again.
    pub async fn reload_auto_sync_config(&self) -> Result<AutoSyncConfig> {
        Ok(self.settings.reload().await?)
    }

    /// Hand a committed status change to auto-sync. Never fails.
    pub async fn on_status_changed(&self, event: StatusChangeEvent) -> Dispatch {
        self.trigger.on_status_changed(event).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn run_reconciliation(&self) -> ReconciliationReport {
        self.reconciliation.audit_and_repair().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rate Limiting
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn check_rate_limit(
        &self,
        action: &str,
        identifier: &str,
    ) -> Result<RateLimitDecision> {
        self.rate_limiter.check(action, identifier).await
    }

    pub async fn record_attempt(
        &self,
        action: &str,
        identifier: &str,
        success: bool,
    ) -> Result<RateLimitDecision> {
        self.rate_limiter.record(action, identifier, success).await
    }

    /// Administrative unlock of one key.
    pub async fn reset_rate_limit(&self, action: &str, identifier: &str) -> Result<bool> {
        self.rate_limiter.reset(action, identifier).await
    }

    pub async fn purge_expired_rate_limits(&self) -> Result<u64> {
        self.rate_limiter.purge_expired().await
    }

    /// The limiter itself, for callers that supply their own clock.
    pub fn rate_limiter(&self) -> &RateLimiter<S> {
        &self.rate_limiter
    }
}
