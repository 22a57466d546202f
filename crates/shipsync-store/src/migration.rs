//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;
use shipsync_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 3;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        3 => apply_v3(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: records and sessions.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Parents: customers resolved from remote shipments
        CREATE TABLE parents (
            id INTEGER PRIMARY KEY,
            external_id TEXT,                 -- remote customer id, nullable
            identity_key TEXT,                -- name+address fingerprint, nullable
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            phone TEXT,
            placeholder INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Children: packages. parent_id is deliberately not a foreign key,
        -- partial syncs can leave it dangling until reconciliation runs.
        CREATE TABLE children (
            id INTEGER PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            parent_id INTEGER NOT NULL,
            shipment_id TEXT NOT NULL,
            tracking_number TEXT NOT NULL,
            status TEXT NOT NULL,
            description TEXT,
            weight_grams INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Profile-like records sharing the parent id space
        CREATE TABLE profiles (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT,
            phone TEXT
        );

        -- Import sessions
        CREATE TABLE sync_sessions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id BLOB NOT NULL UNIQUE,  -- 16 bytes
            filter_key TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            total_units INTEGER NOT NULL DEFAULT 0,
            processed_units INTEGER NOT NULL DEFAULT 0,
            created_records INTEGER NOT NULL DEFAULT 0,
            updated_records INTEGER NOT NULL DEFAULT 0,
            created_related_entities INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );

        -- At most one running session per filter key
        CREATE UNIQUE INDEX idx_sync_sessions_running
            ON sync_sessions(filter_key) WHERE status = 'in_progress';

        CREATE INDEX idx_parents_external ON parents(external_id);
        CREATE INDEX idx_parents_identity ON parents(identity_key);
        CREATE INDEX idx_children_parent ON children(parent_id);
        CREATE INDEX idx_sync_sessions_filter ON sync_sessions(filter_key);
        "#,
    )?;

    Ok(())
}

/// Migration v2: auto-sync configuration and rate-limit windows.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE auto_sync_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            enabled INTEGER NOT NULL,
            trigger_statuses BLOB NOT NULL,   -- CBOR array of strings
            retry_attempts INTEGER NOT NULL,
            retry_delay_seconds INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE rate_limit_windows (
            action TEXT NOT NULL,
            identifier TEXT NOT NULL,
            attempts BLOB NOT NULL,           -- CBOR array of attempts
            blocked_until INTEGER,
            expires_at INTEGER,               -- max(window, block) past the last attempt
            PRIMARY KEY (action, identifier)
        );

        CREATE INDEX idx_rate_limit_expiry ON rate_limit_windows(expires_at);
        "#,
    )?;

    Ok(())
}

/// Migration v3: one id sequence shared by parents and children.
///
/// `last_id` only grows, so ids of deleted rows are never handed out again.
fn apply_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE record_ids (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_id INTEGER NOT NULL
        );

        INSERT INTO record_ids (id, last_id)
        SELECT 1, MAX(
            COALESCE((SELECT MAX(id) FROM parents), 0),
            COALESCE((SELECT MAX(id) FROM children), 0)
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "parents",
            "children",
            "profiles",
            "sync_sessions",
            "auto_sync_config",
            "rate_limit_windows",
            "schema_migrations",
            "record_ids",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_id_sequence_starts_above_existing_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
            [],
        )
        .unwrap();
        {
            let tx = conn.transaction().unwrap();
            for version in 1..=2 {
                apply_migration(&tx, version).unwrap();
                tx.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, 0)",
                    [version],
                )
                .unwrap();
            }
            tx.execute(
                "INSERT INTO children (id, external_id, parent_id, shipment_id, tracking_number,
                    status, created_at, updated_at)
                 VALUES (7, 'P-1', 3, 'S-1', 'TRK', 'in_transit', 0, 0)",
                [],
            )
            .unwrap();
            tx.commit().unwrap();
        }

        migrate(&mut conn).unwrap();
        let last_id: i64 = conn
            .query_row("SELECT last_id FROM record_ids WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(last_id, 7);
    }
}
