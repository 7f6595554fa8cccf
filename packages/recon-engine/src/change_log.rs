//! C4 Change Log Store.
//!
//! An append-only `ChangeLog` table in the per-tenant control store.
//! Identity (`id`) is assigned by the store itself (`AUTOINCREMENT`),
//! never by the caller, so two workstations appending concurrently never
//! collide.

use chrono::{DateTime, Utc};
use recon_core::{ChangeLogEntry, ChangeOperation, PendingChange};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::EngineResult;

/// Operations on the control store's `ChangeLog` table (§4.4).
pub struct ChangeLogStore;

impl ChangeLogStore {
    /// Create the table if it does not exist yet. Safe to call repeatedly
    /// (schema upgrade is idempotent, §6).
    pub fn ensure_schema(conn: &Connection) -> EngineResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ChangeLog (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tableName TEXT NOT NULL,
                recordId TEXT NOT NULL,
                operation TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                synchronized INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_change_log_unsynced
                ON ChangeLog(synchronized, id);",
        )?;
        Ok(())
    }

    /// Append a single entry (`append`, §4.4).
    pub fn append(
        conn: &Connection,
        table_name: &str,
        record_id: &str,
        operation: ChangeOperation,
    ) -> EngineResult<i64> {
        Self::append_batch(
            conn,
            &[PendingChange {
                table_name: table_name.to_string(),
                record_id: record_id.to_string(),
                operation,
            }],
        )
        .map(|ids| ids[0])
    }

    /// Append many entries in one statement/transaction (`appendBatch`,
    /// §4.4). Propagates any failure -- no partial appends survive.
    pub fn append_batch(conn: &Connection, entries: &[PendingChange]) -> EngineResult<Vec<i64>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let mut ids = Vec::with_capacity(entries.len());
        let mut stmt = conn.prepare_cached(
            "INSERT INTO ChangeLog (tableName, recordId, operation, timestamp, synchronized)
             VALUES (?1, ?2, ?3, ?4, 0)",
        )?;
        for entry in entries {
            stmt.execute(params![
                entry.table_name,
                entry.record_id,
                entry.operation.as_str(),
                now.to_rfc3339(),
            ])?;
            ids.push(conn.last_insert_rowid());
        }
        Ok(ids)
    }

    /// Entries awaiting replay, ordered by id ascending (`listUnsynced`,
    /// §4.4; FIFO ordering per §5).
    pub fn list_unsynced(conn: &Connection) -> EngineResult<Vec<ChangeLogEntry>> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, tableName, recordId, operation, timestamp, synchronized
             FROM ChangeLog WHERE synchronized = 0 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Flip `synchronized` for the given ids, all-or-nothing (`markSynced`,
    /// §4.4).
    pub fn mark_synced(conn: &Connection, ids: &[i64]) -> EngineResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("UPDATE ChangeLog SET synchronized = 1 WHERE id IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        conn.execute(&sql, params.as_slice())?;
        Ok(())
    }

    /// Whether any unsynced entries exist, used by the tenant controller's
    /// cold-start check (§4.9 step 4) and `synchronize`'s fast path (§4.9).
    pub fn has_unsynced(conn: &Connection) -> EngineResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ChangeLog WHERE synchronized = 0",
            [],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeLogEntry> {
    let op_str: String = row.get(3)?;
    let ts_str: String = row.get(4)?;
    let synchronized: i64 = row.get(5)?;
    Ok(ChangeLogEntry {
        id: row.get(0)?,
        table_name: row.get(1)?,
        record_id: row.get(2)?,
        operation: op_str.parse().unwrap_or(ChangeOperation::Update),
        timestamp: parse_rfc3339_or_now(&ts_str),
        synchronized: synchronized != 0,
    })
}

fn parse_rfc3339_or_now(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Buffered, not-yet-appended entries. `commit` flushes them in one
/// `appendBatch` call; dropping without committing discards them -- since
/// nothing touches the store until `commit`, "close without commit" needs
/// no rollback (`session()`/`commit()`/`close()`, §4.4).
#[derive(Default)]
pub struct ChangeLogSession {
    buffered: Vec<PendingChange>,
}

impl ChangeLogSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        table_name: impl Into<String>,
        record_id: impl Into<String>,
        operation: ChangeOperation,
    ) {
        self.buffered.push(PendingChange {
            table_name: table_name.into(),
            record_id: record_id.into(),
            operation,
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }

    pub fn commit(self, conn: &Connection) -> EngineResult<Vec<i64>> {
        ChangeLogStore::append_batch(conn, &self.buffered)
    }
}

/// Lookup helper used by the replicator to find an entry's current
/// `synchronized` flag in tests and diagnostics.
pub fn find_entry(conn: &Connection, id: i64) -> EngineResult<Option<ChangeLogEntry>> {
    conn.query_row(
        "SELECT id, tableName, recordId, operation, timestamp, synchronized
         FROM ChangeLog WHERE id = ?1",
        params![id],
        row_to_entry,
    )
    .optional()
    .map_err(Into::into)
}
