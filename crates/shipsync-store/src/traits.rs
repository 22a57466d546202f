//! Store traits: the abstract interface for everything the engine persists.
//!
//! Implementations include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use shipsync_core::{
    AttemptLog, AutoSyncConfig, ChildFields, ChildRecord, ExternalId, FilterKey, ParentFields,
    ParentMatch, ParentRecord, ProfileRecord, RateLimitKey, RecordId, SessionId, SyncSession,
    UpsertOutcome,
};

use crate::error::Result;

/// Result of trying to register a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginResult {
    /// The session row was stored as `in_progress`.
    Started,
    /// Another session already runs for the same filter key.
    Conflict {
        /// The session currently holding the key.
        existing: SessionId,
    },
}

/// Parents that collapse to one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// `external:<id>` or `key:<identity key>`.
    pub identity: String,
    /// Ascending.
    pub parent_ids: Vec<RecordId>,
}

/// Local parent/child records.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Upserts
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or update a parent.
    ///
    /// Matches on `external_id` first, then on `identity_key`, lowest id
    /// winning if several rows match. A matched row adopts the incoming
    /// external id when it had none and loses its placeholder mark.
    async fn upsert_parent(&self, key: &ParentMatch, fields: &ParentFields)
        -> Result<UpsertOutcome>;

    /// Insert or update a child keyed by its external id.
    async fn upsert_child(&self, external_id: &ExternalId, fields: &ChildFields)
        -> Result<UpsertOutcome>;

    /// Insert a parent with an explicit id. Returns `false` if the id is taken.
    async fn insert_parent(&self, parent: &ParentRecord) -> Result<bool>;

    /// Delete a parent row without touching its children.
    async fn delete_parent(&self, id: RecordId) -> Result<bool>;

    /// Insert or replace a profile record.
    async fn upsert_profile(&self, profile: &ProfileRecord) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_parent(&self, id: RecordId) -> Result<Option<ParentRecord>>;

    async fn get_child(&self, id: RecordId) -> Result<Option<ChildRecord>>;

    async fn find_child_by_external_id(&self, external_id: &ExternalId)
        -> Result<Option<ChildRecord>>;

    async fn find_profile(&self, id: RecordId) -> Result<Option<ProfileRecord>>;

    async fn count_parents(&self) -> Result<u64>;

    async fn count_children(&self) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Audits
    // ─────────────────────────────────────────────────────────────────────────

    /// Children whose `parent_id` resolves to no parent, ordered by id.
    async fn find_orphans(&self) -> Result<Vec<ChildRecord>>;

    /// Groups of two or more parents sharing an external id or identity key.
    async fn find_duplicate_identities(&self) -> Result<Vec<DuplicateGroup>>;
}

/// Import session rows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store an `in_progress` session unless its filter key is taken.
    async fn begin_session(&self, session: &SyncSession) -> Result<BeginResult>;

    /// Persist a new snapshot of an existing session.
    ///
    /// Fails with `Immutable` if the stored row is already terminal.
    async fn save_session(&self, session: &SyncSession) -> Result<()>;

    async fn get_session(&self, id: &SessionId) -> Result<Option<SyncSession>>;

    async fn find_running_session(&self, filter_key: &FilterKey) -> Result<Option<SyncSession>>;

    /// Most recent sessions first, optionally for one filter key.
    async fn list_sessions(
        &self,
        filter_key: Option<&FilterKey>,
        limit: usize,
    ) -> Result<Vec<SyncSession>>;

    async fn list_running_sessions(&self) -> Result<Vec<SyncSession>>;
}

/// The single auto-sync configuration row.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_auto_sync_config(&self) -> Result<Option<AutoSyncConfig>>;

    async fn save_auto_sync_config(&self, config: &AutoSyncConfig) -> Result<()>;
}

/// Attempt windows keyed by `(action, identifier)`.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Load the log for `key`; expired or missing logs come back empty.
    async fn load_attempt_log(&self, key: &RateLimitKey, now: i64) -> Result<AttemptLog>;

    /// Replace the log for `key`. An empty log deletes the row.
    async fn save_attempt_log(
        &self,
        key: &RateLimitKey,
        log: &AttemptLog,
        expires_at: Option<i64>,
    ) -> Result<()>;

    async fn delete_attempt_log(&self, key: &RateLimitKey) -> Result<bool>;

    /// Delete every log whose expiry is at or before `now`.
    async fn purge_expired_attempt_logs(&self, now: i64) -> Result<u64>;
}

/// Everything the engine needs from persistence.
pub trait Store: RecordRepository + SessionStore + ConfigStore + RateLimitStore {}

impl<T> Store for T where T: RecordRepository + SessionStore + ConfigStore + RateLimitStore {}
