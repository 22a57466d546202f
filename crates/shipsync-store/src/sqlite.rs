//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend for the shipsync engine. It uses
//! rusqlite with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use shipsync_core::{
    now_millis, Attempt, AttemptLog, AutoSyncConfig, ChildFields, ChildRecord, ExternalId,
    FilterKey, ParentFields, ParentMatch, ParentRecord, ProfileRecord, RateLimitKey, RecordId,
    SessionId, SessionStatus, StatusValue, SyncSession, UpsertOutcome,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    BeginResult, ConfigStore, DuplicateGroup, RateLimitStore, RecordRepository, SessionStore,
};

const PARENT_COLUMNS: &str =
    "id, external_id, identity_key, name, address, phone, placeholder, created_at, updated_at";

const CHILD_COLUMNS: &str = "id, external_id, parent_id, shipment_id, tracking_number, status, \
     description, weight_grams, created_at, updated_at";

const SESSION_COLUMNS: &str = "session_id, filter_key, status, started_at, completed_at, \
     total_units, processed_units, created_records, updated_records, created_related_entities, \
     error_count, last_error";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(StoreError::task_failed)?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_parent(row: &Row<'_>) -> rusqlite::Result<ParentRecord> {
    Ok(ParentRecord {
        id: RecordId(row.get("id")?),
        external_id: row.get::<_, Option<String>>("external_id")?.map(ExternalId),
        identity_key: row.get("identity_key")?,
        fields: ParentFields {
            name: row.get("name")?,
            address: row.get("address")?,
            phone: row.get("phone")?,
        },
        placeholder: row.get("placeholder")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_child(row: &Row<'_>) -> rusqlite::Result<ChildRecord> {
    Ok(ChildRecord {
        id: RecordId(row.get("id")?),
        external_id: ExternalId(row.get("external_id")?),
        fields: ChildFields {
            parent_id: RecordId(row.get("parent_id")?),
            shipment_id: ExternalId(row.get("shipment_id")?),
            tracking_number: row.get("tracking_number")?,
            status: StatusValue(row.get("status")?),
            description: row.get("description")?,
            weight_grams: row.get("weight_grams")?,
        },
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SyncSession> {
    let id_bytes: Vec<u8> = row.get("session_id")?;
    let id: [u8; 16] = id_bytes.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(0, "session_id".into(), rusqlite::types::Type::Blob)
    })?;
    let status: String = row.get("status")?;

    Ok(SyncSession {
        id: SessionId::from_bytes(id),
        filter_key: FilterKey(row.get("filter_key")?),
        status: status.parse::<SessionStatus>().map_err(|e| conversion_error(2, e))?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        total_units: row.get::<_, i64>("total_units")? as u64,
        processed_units: row.get::<_, i64>("processed_units")? as u64,
        created_records: row.get::<_, i64>("created_records")? as u64,
        updated_records: row.get::<_, i64>("updated_records")? as u64,
        created_related_entities: row.get::<_, i64>("created_related_entities")? as u64,
        error_count: row.get::<_, i64>("error_count")? as u64,
        last_error: row.get("last_error")?,
    })
}

fn encode_cbor<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn query_sessions(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<SyncSession>> {
    let mut stmt = conn.prepare(sql)?;
    let sessions = stmt
        .query_map(params, row_to_session)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sessions)
}

fn duplicate_groups(conn: &Connection, column: &str, prefix: &str) -> Result<Vec<DuplicateGroup>> {
    let sql = format!(
        "SELECT {column}, id FROM parents
         WHERE {column} IN (
             SELECT {column} FROM parents WHERE {column} IS NOT NULL
             GROUP BY {column} HAVING COUNT(*) > 1
         )
         ORDER BY {column}, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, RecordId(row.get(1)?))))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut groups: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();
    for (identity, id) in rows {
        groups.entry(format!("{prefix}:{identity}")).or_default().push(id);
    }
    Ok(groups
        .into_iter()
        .map(|(identity, parent_ids)| DuplicateGroup {
            identity,
            parent_ids,
        })
        .collect())
}

/// Next id from the sequence shared by parents and children.
fn allocate_record_id(conn: &Connection) -> Result<i64> {
    conn.execute("UPDATE record_ids SET last_id = last_id + 1 WHERE id = 1", [])?;
    Ok(conn.query_row("SELECT last_id FROM record_ids WHERE id = 1", [], |row| {
        row.get(0)
    })?)
}

/// Keep the shared sequence above an id chosen by the caller.
fn reserve_record_id(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE record_ids SET last_id = MAX(last_id, ?1) WHERE id = 1",
        params![id],
    )?;
    Ok(())
}

#[async_trait]
impl RecordRepository for SqliteStore {
    async fn upsert_parent(
        &self,
        key: &ParentMatch,
        fields: &ParentFields,
    ) -> Result<UpsertOutcome> {
        let key = key.clone();
        let fields = fields.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();

            let mut matched: Option<i64> = None;
            if let Some(ext) = &key.external_id {
                matched = tx
                    .query_row(
                        "SELECT id FROM parents WHERE external_id = ?1 ORDER BY id LIMIT 1",
                        params![ext.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
            }
            if matched.is_none() {
                if let Some(identity) = &key.identity_key {
                    matched = tx
                        .query_row(
                            "SELECT id FROM parents WHERE identity_key = ?1 ORDER BY id LIMIT 1",
                            params![identity],
                            |row| row.get(0),
                        )
                        .optional()?;
                }
            }

            let outcome = match matched {
                Some(id) => {
                    tx.execute(
                        "UPDATE parents SET
                            name = ?2, address = ?3, phone = ?4,
                            external_id = COALESCE(external_id, ?5),
                            identity_key = COALESCE(?6, identity_key),
                            placeholder = 0, updated_at = ?7
                         WHERE id = ?1",
                        params![
                            id,
                            fields.name,
                            fields.address,
                            fields.phone,
                            key.external_id.as_ref().map(|e| e.as_str()),
                            key.identity_key,
                            now,
                        ],
                    )?;
                    UpsertOutcome::updated(RecordId(id))
                }
                None => {
                    let id = allocate_record_id(&tx)?;
                    tx.execute(
                        "INSERT INTO parents (
                            id, external_id, identity_key, name, address, phone,
                            placeholder, created_at, updated_at
                         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
                        params![
                            id,
                            key.external_id.as_ref().map(|e| e.as_str()),
                            key.identity_key,
                            fields.name,
                            fields.address,
                            fields.phone,
                            now,
                        ],
                    )?;
                    UpsertOutcome::created(RecordId(id))
                }
            };

            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn upsert_child(
        &self,
        external_id: &ExternalId,
        fields: &ChildFields,
    ) -> Result<UpsertOutcome> {
        let external_id = external_id.clone();
        let fields = fields.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM children WHERE external_id = ?1",
                    params![external_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let outcome = match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE children SET
                            parent_id = ?2, shipment_id = ?3, tracking_number = ?4,
                            status = ?5, description = ?6, weight_grams = ?7, updated_at = ?8
                         WHERE id = ?1",
                        params![
                            id,
                            fields.parent_id.0,
                            fields.shipment_id.as_str(),
                            fields.tracking_number,
                            fields.status.as_str(),
                            fields.description,
                            fields.weight_grams,
                            now,
                        ],
                    )?;
                    UpsertOutcome::updated(RecordId(id))
                }
                None => {
                    let next_id = allocate_record_id(&tx)?;
                    tx.execute(
                        "INSERT INTO children (
                            id, external_id, parent_id, shipment_id, tracking_number,
                            status, description, weight_grams, created_at, updated_at
                         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                        params![
                            next_id,
                            external_id.as_str(),
                            fields.parent_id.0,
                            fields.shipment_id.as_str(),
                            fields.tracking_number,
                            fields.status.as_str(),
                            fields.description,
                            fields.weight_grams,
                            now,
                        ],
                    )?;
                    UpsertOutcome::created(RecordId(next_id))
                }
            };

            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn insert_parent(&self, parent: &ParentRecord) -> Result<bool> {
        let parent = parent.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM parents WHERE id = ?1)
                     OR EXISTS(SELECT 1 FROM children WHERE id = ?1)",
                params![parent.id.0],
                |row| row.get(0),
            )?;
            if taken {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO parents (
                    id, external_id, identity_key, name, address, phone,
                    placeholder, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    parent.id.0,
                    parent.external_id.as_ref().map(|e| e.as_str()),
                    parent.identity_key,
                    parent.fields.name,
                    parent.fields.address,
                    parent.fields.phone,
                    parent.placeholder,
                    parent.created_at,
                    parent.updated_at,
                ],
            )?;
            reserve_record_id(&tx, parent.id.0)?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn delete_parent(&self, id: RecordId) -> Result<bool> {
        self.blocking(move |conn| {
            let deleted = conn.execute("DELETE FROM parents WHERE id = ?1", params![id.0])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn upsert_profile(&self, profile: &ProfileRecord) -> Result<()> {
        let profile = profile.clone();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO profiles (id, name, address, phone) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, address = excluded.address, phone = excluded.phone",
                params![profile.id.0, profile.name, profile.address, profile.phone],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_parent(&self, id: RecordId) -> Result<Option<ParentRecord>> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {PARENT_COLUMNS} FROM parents WHERE id = ?1"),
                params![id.0],
                row_to_parent,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_child(&self, id: RecordId) -> Result<Option<ChildRecord>> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {CHILD_COLUMNS} FROM children WHERE id = ?1"),
                params![id.0],
                row_to_child,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn find_child_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<ChildRecord>> {
        let external_id = external_id.clone();

        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {CHILD_COLUMNS} FROM children WHERE external_id = ?1"),
                params![external_id.as_str()],
                row_to_child,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn find_profile(&self, id: RecordId) -> Result<Option<ProfileRecord>> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, name, address, phone FROM profiles WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(ProfileRecord {
                        id: RecordId(row.get(0)?),
                        name: row.get(1)?,
                        address: row.get(2)?,
                        phone: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn count_parents(&self) -> Result<u64> {
        self.blocking(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM parents", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn count_children(&self) -> Result<u64> {
        self.blocking(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM children", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn find_orphans(&self) -> Result<Vec<ChildRecord>> {
        self.blocking(|conn| {
            let sql = format!(
                "SELECT {CHILD_COLUMNS} FROM children c
                 WHERE NOT EXISTS (SELECT 1 FROM parents p WHERE p.id = c.parent_id)
                 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let orphans = stmt
                .query_map([], row_to_child)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(orphans)
        })
        .await
    }

    async fn find_duplicate_identities(&self) -> Result<Vec<DuplicateGroup>> {
        self.blocking(|conn| {
            let mut groups = duplicate_groups(conn, "external_id", "external")?;
            groups.extend(duplicate_groups(conn, "identity_key", "key")?);
            groups.sort_by(|a, b| a.identity.cmp(&b.identity));
            Ok(groups)
        })
        .await
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn begin_session(&self, session: &SyncSession) -> Result<BeginResult> {
        let session = session.clone();

        self.blocking(move |conn| {
            let existing: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT session_id FROM sync_sessions
                     WHERE filter_key = ?1 AND status = 'in_progress'",
                    params![session.filter_key.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(bytes) = existing {
                let id: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| StoreError::InvalidData("session_id is not 16 bytes".into()))?;
                return Ok(BeginResult::Conflict {
                    existing: SessionId::from_bytes(id),
                });
            }

            conn.execute(
                "INSERT INTO sync_sessions (
                    session_id, filter_key, status, started_at, completed_at,
                    total_units, processed_units, created_records, updated_records,
                    created_related_entities, error_count, last_error
                 ) VALUES (?1, ?2, 'in_progress', ?3, NULL, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session.id.as_bytes().as_slice(),
                    session.filter_key.as_str(),
                    session.started_at,
                    session.total_units as i64,
                    session.processed_units as i64,
                    session.created_records as i64,
                    session.updated_records as i64,
                    session.created_related_entities as i64,
                    session.error_count as i64,
                    session.last_error,
                ],
            )?;
            Ok(BeginResult::Started)
        })
        .await
    }

    async fn save_session(&self, session: &SyncSession) -> Result<()> {
        let session = session.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let stored: Option<String> = tx
                .query_row(
                    "SELECT status FROM sync_sessions WHERE session_id = ?1",
                    params![session.id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;

            let stored = stored.ok_or_else(|| StoreError::NotFound(format!("session {}", session.id)))?;
            let stored: SessionStatus = stored
                .parse()
                .map_err(|e: shipsync_core::CoreError| StoreError::InvalidData(e.to_string()))?;
            if stored.is_terminal() {
                return Err(StoreError::Immutable(format!("session {}", session.id)));
            }

            tx.execute(
                "UPDATE sync_sessions SET
                    status = ?2, started_at = ?3, completed_at = ?4,
                    total_units = ?5, processed_units = ?6, created_records = ?7,
                    updated_records = ?8, created_related_entities = ?9,
                    error_count = ?10, last_error = ?11
                 WHERE session_id = ?1",
                params![
                    session.id.as_bytes().as_slice(),
                    session.status.as_str(),
                    session.started_at,
                    session.completed_at,
                    session.total_units as i64,
                    session.processed_units as i64,
                    session.created_records as i64,
                    session.updated_records as i64,
                    session.created_related_entities as i64,
                    session.error_count as i64,
                    session.last_error,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SyncSession>> {
        let id = *id;

        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sync_sessions WHERE session_id = ?1"),
                params![id.as_bytes().as_slice()],
                row_to_session,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn find_running_session(&self, filter_key: &FilterKey) -> Result<Option<SyncSession>> {
        let filter_key = filter_key.clone();

        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sync_sessions
                     WHERE filter_key = ?1 AND status = 'in_progress'"
                ),
                params![filter_key.as_str()],
                row_to_session,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_sessions(
        &self,
        filter_key: Option<&FilterKey>,
        limit: usize,
    ) -> Result<Vec<SyncSession>> {
        let filter_key = filter_key.cloned();
        let limit = limit.min(i64::MAX as usize) as i64;

        self.blocking(move |conn| match filter_key {
            Some(key) => query_sessions(
                conn,
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sync_sessions
                     WHERE filter_key = ?1 ORDER BY seq DESC LIMIT ?2"
                ),
                params![key.as_str(), limit],
            ),
            None => query_sessions(
                conn,
                &format!("SELECT {SESSION_COLUMNS} FROM sync_sessions ORDER BY seq DESC LIMIT ?1"),
                params![limit],
            ),
        })
        .await
    }

    async fn list_running_sessions(&self) -> Result<Vec<SyncSession>> {
        self.blocking(|conn| {
            query_sessions(
                conn,
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sync_sessions
                     WHERE status = 'in_progress' ORDER BY seq"
                ),
                [],
            )
        })
        .await
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn load_auto_sync_config(&self) -> Result<Option<AutoSyncConfig>> {
        self.blocking(|conn| {
            let row: Option<(bool, Vec<u8>, u32, i64)> = conn
                .query_row(
                    "SELECT enabled, trigger_statuses, retry_attempts, retry_delay_seconds
                     FROM auto_sync_config WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let Some((enabled, statuses, retry_attempts, retry_delay_seconds)) = row else {
                return Ok(None);
            };
            let statuses: Vec<String> = decode_cbor(&statuses)?;

            Ok(Some(AutoSyncConfig {
                enabled,
                trigger_statuses: statuses.into_iter().map(StatusValue).collect::<BTreeSet<_>>(),
                retry_attempts,
                retry_delay_seconds: retry_delay_seconds.max(0) as u64,
            }))
        })
        .await
    }

    async fn save_auto_sync_config(&self, config: &AutoSyncConfig) -> Result<()> {
        let statuses: Vec<&str> = config.trigger_statuses.iter().map(|s| s.as_str()).collect();
        let statuses = encode_cbor(&statuses)?;
        let config = config.clone();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO auto_sync_config (
                    id, enabled, trigger_statuses, retry_attempts, retry_delay_seconds, updated_at
                 ) VALUES (1, ?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    enabled = excluded.enabled,
                    trigger_statuses = excluded.trigger_statuses,
                    retry_attempts = excluded.retry_attempts,
                    retry_delay_seconds = excluded.retry_delay_seconds,
                    updated_at = excluded.updated_at",
                params![
                    config.enabled,
                    statuses,
                    config.retry_attempts,
                    config.retry_delay_seconds as i64,
                    now_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl RateLimitStore for SqliteStore {
    async fn load_attempt_log(&self, key: &RateLimitKey, now: i64) -> Result<AttemptLog> {
        let key = key.clone();

        self.blocking(move |conn| {
            let row: Option<(Vec<u8>, Option<i64>)> = conn
                .query_row(
                    "SELECT attempts, blocked_until FROM rate_limit_windows
                     WHERE action = ?1 AND identifier = ?2
                       AND (expires_at IS NULL OR expires_at > ?3)",
                    params![key.action, key.identifier, now],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((attempts, blocked_until)) => Ok(AttemptLog {
                    attempts: decode_cbor::<Vec<Attempt>>(&attempts)?,
                    blocked_until,
                }),
                None => Ok(AttemptLog::new()),
            }
        })
        .await
    }

    async fn save_attempt_log(
        &self,
        key: &RateLimitKey,
        log: &AttemptLog,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let key = key.clone();
        if log.is_empty() {
            self.delete_attempt_log(&key).await?;
            return Ok(());
        }
        let attempts = encode_cbor(&log.attempts)?;
        let blocked_until = log.blocked_until;

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO rate_limit_windows (action, identifier, attempts, blocked_until, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(action, identifier) DO UPDATE SET
                    attempts = excluded.attempts,
                    blocked_until = excluded.blocked_until,
                    expires_at = excluded.expires_at",
                params![key.action, key.identifier, attempts, blocked_until, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_attempt_log(&self, key: &RateLimitKey) -> Result<bool> {
        let key = key.clone();

        self.blocking(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM rate_limit_windows WHERE action = ?1 AND identifier = ?2",
                params![key.action, key.identifier],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn purge_expired_attempt_logs(&self, now: i64) -> Result<u64> {
        self.blocking(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM rate_limit_windows WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )?;
            Ok(deleted as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipsync_core::{RateLimitConfig, UnitOutcome};

    fn parent_fields(name: &str) -> ParentFields {
        ParentFields {
            name: name.into(),
            address: "9 Quay St".into(),
            phone: Some("555-0100".into()),
        }
    }

    fn child_fields(parent_id: RecordId, status: &str) -> ChildFields {
        ChildFields {
            parent_id,
            shipment_id: "S-7".into(),
            tracking_number: "TRK-7".into(),
            status: status.into(),
            description: Some("books".into()),
            weight_grams: Some(1200),
        }
    }

    #[tokio::test]
    async fn test_sqlite_record_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let key = ParentMatch {
            external_id: Some("C-7".into()),
            identity_key: Some("fp".into()),
        };

        let parent = store.upsert_parent(&key, &parent_fields("Cy")).await.unwrap();
        assert!(parent.created);
        let again = store.upsert_parent(&key, &parent_fields("Cy R.")).await.unwrap();
        assert_eq!(again, UpsertOutcome::updated(parent.id));

        let child = store
            .upsert_child(&"P-7".into(), &child_fields(parent.id, "in_transit"))
            .await
            .unwrap();
        assert!(child.created);
        assert_ne!(child.id, parent.id);

        let updated = store
            .upsert_child(&"P-7".into(), &child_fields(parent.id, "delivered"))
            .await
            .unwrap();
        assert!(!updated.created);

        let stored = store.get_child(child.id).await.unwrap().unwrap();
        assert_eq!(stored.fields.status, StatusValue::from("delivered"));
        assert_eq!(stored.fields.weight_grams, Some(1200));

        let by_ext = store.find_child_by_external_id(&"P-7".into()).await.unwrap();
        assert_eq!(by_ext.map(|c| c.id), Some(child.id));

        let parent = store.get_parent(parent.id).await.unwrap().unwrap();
        assert_eq!(parent.fields.name, "Cy R.");
    }

    #[tokio::test]
    async fn test_sqlite_orphans_and_duplicates() {
        let store = SqliteStore::open_memory().unwrap();
        let now = now_millis();

        for id in [100, 101] {
            let inserted = store
                .insert_parent(&ParentRecord {
                    id: RecordId(id),
                    external_id: Some("C-dup".into()),
                    identity_key: None,
                    fields: parent_fields("Twin"),
                    placeholder: false,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
            assert!(inserted);
        }
        store
            .upsert_child(&"P-1".into(), &child_fields(RecordId(555), "in_transit"))
            .await
            .unwrap();

        let orphans = store.find_orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].fields.parent_id, RecordId(555));

        let groups = store.find_duplicate_identities().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].identity, "external:C-dup");
        assert_eq!(groups[0].parent_ids, vec![RecordId(100), RecordId(101)]);
    }

    #[tokio::test]
    async fn test_sqlite_session_lifecycle() {
        let store = SqliteStore::open_memory().unwrap();
        let mut session = SyncSession::new(SessionId::from_bytes([7; 16]), "wh-1".into(), 1);
        session.begin(2).unwrap();
        assert_eq!(store.begin_session(&session).await.unwrap(), BeginResult::Started);

        let rival = SyncSession::new(SessionId::from_bytes([8; 16]), "wh-1".into(), 3);
        assert_eq!(
            store.begin_session(&rival).await.unwrap(),
            BeginResult::Conflict { existing: session.id }
        );

        session.observe_page(2, Some(2));
        session.record_unit(UnitOutcome::Failed { message: "bad".into() });
        session.record_unit(UnitOutcome::Applied {
            created_records: 1,
            updated_records: 0,
            created_related: 1,
        });
        store.save_session(&session).await.unwrap();
        let running = store.find_running_session(&"wh-1".into()).await.unwrap().unwrap();
        assert_eq!(running.processed_units, 2);

        session.complete(5, 9).unwrap();
        store.save_session(&session).await.unwrap();
        assert!(matches!(
            store.save_session(&session).await,
            Err(StoreError::Immutable(_))
        ));

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(store.list_running_sessions().await.unwrap().is_empty());

        // Key is free again.
        assert_eq!(store.begin_session(&rival).await.unwrap(), BeginResult::Started);
        let history = store.list_sessions(Some(&"wh-1".into()), 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, rival.id);
    }

    #[tokio::test]
    async fn test_sqlite_config_and_rate_limits() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store.load_auto_sync_config().await.unwrap().is_none());

        let mut config = AutoSyncConfig::default();
        config.enabled = true;
        store.save_auto_sync_config(&config).await.unwrap();
        assert_eq!(store.load_auto_sync_config().await.unwrap(), Some(config));

        let limits = RateLimitConfig::default();
        let key = RateLimitKey::new("login", "a@x.com");
        let mut log = AttemptLog::new();
        log.record(&limits, 1_000, false);
        store
            .save_attempt_log(&key, &log, log.expires_at(&limits))
            .await
            .unwrap();

        assert_eq!(store.load_attempt_log(&key, 2_000).await.unwrap(), log);

        let expiry = log.expires_at(&limits).unwrap();
        assert!(store.load_attempt_log(&key, expiry).await.unwrap().is_empty());
        assert_eq!(store.purge_expired_attempt_logs(expiry).await.unwrap(), 1);
        assert!(!store.delete_attempt_log(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_file_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipsync.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .upsert_profile(&ProfileRecord {
                    id: RecordId(42),
                    name: "Dee".into(),
                    address: None,
                    phone: None,
                })
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let profile = store.find_profile(RecordId(42)).await.unwrap().unwrap();
        assert_eq!(profile.name, "Dee");
    }

    fn customer(external_id: &str) -> ParentMatch {
        ParentMatch {
            external_id: Some(external_id.into()),
            identity_key: None,
        }
    }

    #[tokio::test]
    async fn test_sqlite_parent_and_child_ids_are_disjoint() {
        let store = SqliteStore::open_memory().unwrap();

        let a = store.upsert_parent(&customer("C-A"), &parent_fields("Ann")).await.unwrap();
        let child = store
            .upsert_child(&"P-A".into(), &child_fields(a.id, "in_transit"))
            .await
            .unwrap();
        let b = store.upsert_parent(&customer("C-B"), &parent_fields("Bo")).await.unwrap();

        assert_eq!((a.id, child.id, b.id), (RecordId(1), RecordId(2), RecordId(3)));

        // A restored parent keeps its id and moves the sequence past it.
        let now = now_millis();
        assert!(store
            .insert_parent(&ParentRecord {
                id: RecordId(50),
                external_id: None,
                identity_key: None,
                fields: parent_fields("Restored"),
                placeholder: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap());
        let c = store.upsert_parent(&customer("C-C"), &parent_fields("Cy")).await.unwrap();
        assert_eq!(c.id, RecordId(51));
    }

    #[tokio::test]
    async fn test_sqlite_deleted_parent_id_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipsync.db");

        let lost = {
            let store = SqliteStore::open(&path).unwrap();
            let b = store.upsert_parent(&customer("C-B"), &parent_fields("Bo")).await.unwrap();
            store
                .upsert_child(&"P-B".into(), &child_fields(b.id, "in_transit"))
                .await
                .unwrap();
            assert!(store.delete_parent(b.id).await.unwrap());

            let c = store.upsert_parent(&customer("C-C"), &parent_fields("Cy")).await.unwrap();
            assert_ne!(c.id, b.id);
            b.id
        };

        let store = SqliteStore::open(&path).unwrap();
        let d = store.upsert_parent(&customer("C-D"), &parent_fields("Di")).await.unwrap();
        assert!(d.id.0 > lost.0);

        let orphans = store.find_orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].fields.parent_id, lost);
    }
}
