//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use shipsync_core::{
    now_millis, AttemptLog, AutoSyncConfig, ChildFields, ChildRecord, ExternalId, FilterKey,
    ParentFields, ParentMatch, ParentRecord, ProfileRecord, RateLimitKey, RecordId, SessionId,
    SessionStatus, SyncSession, UpsertOutcome,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    BeginResult, ConfigStore, DuplicateGroup, RateLimitStore, RecordRepository, SessionStore,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Parents and children share one id sequence, like the SQLite rowids.
    next_id: i64,
    parents: BTreeMap<RecordId, ParentRecord>,
    children: BTreeMap<RecordId, ChildRecord>,
    children_by_external: HashMap<ExternalId, RecordId>,
    profiles: HashMap<RecordId, ProfileRecord>,

    /// Sessions with their insertion order, for newest-first listing.
    sessions: HashMap<SessionId, (u64, SyncSession)>,
    session_seq: u64,

    auto_sync_config: Option<AutoSyncConfig>,

    rate_limits: HashMap<RateLimitKey, (AttemptLog, Option<i64>)>,

    /// Number of upcoming record writes that fail with `Unavailable`.
    injected_write_failures: u32,
    /// Number of upcoming `save_session` calls that fail with `Unavailable`.
    injected_session_save_failures: u32,
}

impl MemoryStoreInner {
    fn allocate_id(&mut self) -> RecordId {
        self.next_id += 1;
        RecordId(self.next_id)
    }

    fn reserve_id(&mut self, id: RecordId) {
        self.next_id = self.next_id.max(id.0);
    }

    fn take_injected_failure(&mut self) -> Result<()> {
        if self.injected_write_failures > 0 {
            self.injected_write_failures -= 1;
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Make the next `count` parent/child upserts fail transiently.
    pub fn fail_next_writes(&self, count: u32) {
        self.write().injected_write_failures = count;
    }

    /// Make the next `count` session saves fail transiently.
    pub fn fail_next_session_saves(&self, count: u32) {
        self.write().injected_session_save_failures = count;
    }

    /// Snapshot of every stored parent, ordered by id.
    pub fn parents(&self) -> Vec<ParentRecord> {
        self.read().parents.values().cloned().collect()
    }

    /// Snapshot of every stored child, ordered by id.
    pub fn children(&self) -> Vec<ChildRecord> {
        self.read().children.values().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordRepository for MemoryStore {
    async fn upsert_parent(
        &self,
        key: &ParentMatch,
        fields: &ParentFields,
    ) -> Result<UpsertOutcome> {
        let mut inner = self.write();
        inner.take_injected_failure()?;
        let now = now_millis();

        let by_external = key.external_id.as_ref().and_then(|ext| {
            inner
                .parents
                .values()
                .find(|p| p.external_id.as_ref() == Some(ext))
                .map(|p| p.id)
        });
        let matched = by_external.or_else(|| {
            key.identity_key.as_ref().and_then(|k| {
                inner
                    .parents
                    .values()
                    .find(|p| p.identity_key.as_ref() == Some(k))
                    .map(|p| p.id)
            })
        });

        if let Some(id) = matched {
            if let Some(parent) = inner.parents.get_mut(&id) {
                parent.fields = fields.clone();
                if parent.external_id.is_none() {
                    parent.external_id = key.external_id.clone();
                }
                if key.identity_key.is_some() {
                    parent.identity_key = key.identity_key.clone();
                }
                parent.placeholder = false;
                parent.updated_at = now;
            }
            return Ok(UpsertOutcome::updated(id));
        }

        let id = inner.allocate_id();
        inner.parents.insert(
            id,
            ParentRecord {
                id,
                external_id: key.external_id.clone(),
                identity_key: key.identity_key.clone(),
                fields: fields.clone(),
                placeholder: false,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(UpsertOutcome::created(id))
    }

    async fn upsert_child(
        &self,
        external_id: &ExternalId,
        fields: &ChildFields,
    ) -> Result<UpsertOutcome> {
        let mut inner = self.write();
        inner.take_injected_failure()?;
        let now = now_millis();

        if let Some(&id) = inner.children_by_external.get(external_id) {
            if let Some(child) = inner.children.get_mut(&id) {
                child.fields = fields.clone();
                child.updated_at = now;
            }
            return Ok(UpsertOutcome::updated(id));
        }

        let id = inner.allocate_id();
        inner.children.insert(
            id,
            ChildRecord {
                id,
                external_id: external_id.clone(),
                fields: fields.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        inner.children_by_external.insert(external_id.clone(), id);
        Ok(UpsertOutcome::created(id))
    }

    async fn insert_parent(&self, parent: &ParentRecord) -> Result<bool> {
        let mut inner = self.write();
        if inner.parents.contains_key(&parent.id) || inner.children.contains_key(&parent.id) {
            return Ok(false);
        }
        inner.reserve_id(parent.id);
        inner.parents.insert(parent.id, parent.clone());
        Ok(true)
    }

    async fn delete_parent(&self, id: RecordId) -> Result<bool> {
        Ok(self.write().parents.remove(&id).is_some())
    }

    async fn upsert_profile(&self, profile: &ProfileRecord) -> Result<()> {
        self.write().profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn get_parent(&self, id: RecordId) -> Result<Option<ParentRecord>> {
        Ok(self.read().parents.get(&id).cloned())
    }

    async fn get_child(&self, id: RecordId) -> Result<Option<ChildRecord>> {
        Ok(self.read().children.get(&id).cloned())
    }

    async fn find_child_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<ChildRecord>> {
        let inner = self.read();
        Ok(inner
            .children_by_external
            .get(external_id)
            .and_then(|id| inner.children.get(id))
            .cloned())
    }

    async fn find_profile(&self, id: RecordId) -> Result<Option<ProfileRecord>> {
        Ok(self.read().profiles.get(&id).cloned())
    }

    async fn count_parents(&self) -> Result<u64> {
        Ok(self.read().parents.len() as u64)
    }

    async fn count_children(&self) -> Result<u64> {
        Ok(self.read().children.len() as u64)
    }

    async fn find_orphans(&self) -> Result<Vec<ChildRecord>> {
        let inner = self.read();
        Ok(inner
            .children
            .values()
            .filter(|c| !inner.parents.contains_key(&c.fields.parent_id))
            .cloned()
            .collect())
    }

    async fn find_duplicate_identities(&self) -> Result<Vec<DuplicateGroup>> {
        let inner = self.read();
        let mut groups: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();

        for parent in inner.parents.values() {
            if let Some(ext) = &parent.external_id {
                groups.entry(format!("external:{ext}")).or_default().push(parent.id);
            }
            if let Some(key) = &parent.identity_key {
                groups.entry(format!("key:{key}")).or_default().push(parent.id);
            }
        }

        Ok(groups
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(identity, parent_ids)| DuplicateGroup {
                identity,
                parent_ids,
            })
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn begin_session(&self, session: &SyncSession) -> Result<BeginResult> {
        let mut inner = self.write();

        if let Some((_, existing)) = inner.sessions.values().find(|(_, s)| {
            s.filter_key == session.filter_key && s.status == SessionStatus::InProgress
        }) {
            return Ok(BeginResult::Conflict {
                existing: existing.id,
            });
        }

        inner.session_seq += 1;
        let seq = inner.session_seq;
        let mut stored = session.clone();
        stored.status = SessionStatus::InProgress;
        inner.sessions.insert(session.id, (seq, stored));
        Ok(BeginResult::Started)
    }

    async fn save_session(&self, session: &SyncSession) -> Result<()> {
        let mut inner = self.write();
        if inner.injected_session_save_failures > 0 {
            inner.injected_session_save_failures -= 1;
            return Err(StoreError::Unavailable("injected session save failure".into()));
        }
        let (_, stored) = inner
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session.id)))?;

        if stored.is_terminal() {
            return Err(StoreError::Immutable(format!("session {}", session.id)));
        }
        *stored = session.clone();
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SyncSession>> {
        Ok(self.read().sessions.get(id).map(|(_, s)| s.clone()))
    }

    async fn find_running_session(&self, filter_key: &FilterKey) -> Result<Option<SyncSession>> {
        Ok(self
            .read()
            .sessions
            .values()
            .map(|(_, s)| s)
            .find(|s| &s.filter_key == filter_key && s.is_running())
            .cloned())
    }

    async fn list_sessions(
        &self,
        filter_key: Option<&FilterKey>,
        limit: usize,
    ) -> Result<Vec<SyncSession>> {
        let inner = self.read();
        let mut sessions: Vec<&(u64, SyncSession)> = inner
            .sessions
            .values()
            .filter(|(_, s)| filter_key.map_or(true, |k| &s.filter_key == k))
            .collect();
        sessions.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(sessions
            .into_iter()
            .take(limit)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn list_running_sessions(&self) -> Result<Vec<SyncSession>> {
        Ok(self
            .read()
            .sessions
            .values()
            .map(|(_, s)| s)
            .filter(|s| s.is_running())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load_auto_sync_config(&self) -> Result<Option<AutoSyncConfig>> {
        Ok(self.read().auto_sync_config.clone())
    }

    async fn save_auto_sync_config(&self, config: &AutoSyncConfig) -> Result<()> {
        self.write().auto_sync_config = Some(config.clone());
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn load_attempt_log(&self, key: &RateLimitKey, now: i64) -> Result<AttemptLog> {
        Ok(match self.read().rate_limits.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= now => AttemptLog::new(),
            Some((log, _)) => log.clone(),
            None => AttemptLog::new(),
        })
    }

    async fn save_attempt_log(
        &self,
        key: &RateLimitKey,
        log: &AttemptLog,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let mut inner = self.write();
        if log.is_empty() {
            inner.rate_limits.remove(key);
        } else {
            inner
                .rate_limits
                .insert(key.clone(), (log.clone(), expires_at));
        }
        Ok(())
    }

    async fn delete_attempt_log(&self, key: &RateLimitKey) -> Result<bool> {
        Ok(self.write().rate_limits.remove(key).is_some())
    }

    async fn purge_expired_attempt_logs(&self, now: i64) -> Result<u64> {
        let mut inner = self.write();
        let before = inner.rate_limits.len();
        inner
            .rate_limits
            .retain(|_, (_, expires_at)| expires_at.map_or(true, |at| at > now));
        Ok((before - inner.rate_limits.len()) as u64)
    }
}
