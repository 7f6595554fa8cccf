//! `SyncLog` audit trail, plus the `SystemVersion`/`ImportRuns` tables
//! named in `spec.md` §6 but given no operations there (§12 supplemented
//! behavior). Append-only, diagnostics only -- no component reads it
//! back, so a write failure here is logged and swallowed rather than
//! propagated, the same best-effort policy as the heartbeat and the daily
//! backup (§7).

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::EngineResult;

pub struct SyncLogStore;

impl SyncLogStore {
    /// Create `SyncLog`, `SystemVersion`, `ImportRuns` if absent.
    /// `SystemVersion` is seeded with a single row on first creation;
    /// `ImportRuns` stays empty here -- it is owned by the out-of-scope
    /// importer (§6).
    pub fn ensure_schema(conn: &Connection) -> EngineResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS SyncLog (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation TEXT NOT NULL,
                status TEXT NOT NULL,
                details TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS SystemVersion (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ImportRuns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                startedAt TEXT NOT NULL,
                finishedAt TEXT,
                status TEXT
            );",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO SystemVersion (id, version) VALUES (1, 1)",
            [],
        )?;
        Ok(())
    }

    /// Append one audit entry. Callers on best-effort paths should log
    /// and swallow the result rather than propagate it.
    pub fn record(conn: &Connection, operation: &str, status: &str, details: &str) -> EngineResult<()> {
        conn.execute(
            "INSERT INTO SyncLog (operation, status, details, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![operation, status, details, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Same as [`record`](Self::record), but logs and swallows a failure
    /// instead of propagating it -- the audit trail must never be the
    /// reason a real operation fails.
    pub fn record_best_effort(conn: &Connection, operation: &str, status: &str, details: &str) {
        if let Err(err) = Self::record(conn, operation, status, details) {
            tracing::warn!(operation, status, error = %err, "failed to append SyncLog entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_schema_seeds_system_version_once() {
        let conn = Connection::open_in_memory().unwrap();
        SyncLogStore::ensure_schema(&conn).unwrap();
        SyncLogStore::ensure_schema(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM SystemVersion WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM SystemVersion", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn record_appends_one_row() {
        let conn = Connection::open_in_memory().unwrap();
        SyncLogStore::ensure_schema(&conn).unwrap();
        SyncLogStore::record(&conn, "lock", "acquired", "lockId=abc").unwrap();
        SyncLogStore::record(&conn, "push", "started", "tenant=FR").unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM SyncLog", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
