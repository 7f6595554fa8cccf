//! C5 Global Lock Manager.
//!
//! An exclusive lease row in the control store's `SyncLocks` table, kept
//! alive by a heartbeat task while held. Grounded on the teacher's
//! `network::shutdown::ShutdownController` idiom (a `watch` channel
//! signaling a background task to stop, `ArcSwap`/atomics for the shared
//! state a concurrently-running task touches) -- the phi-accrual failure
//! detector in `cluster/failure_detector.rs` is not reused: the lease here
//! is expiry-based, not statistical suspicion.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use recon_core::GlobalLockRecord;
use rusqlite::{params, Connection, OptionalExtension};
use sysinfo::{Pid, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audit::SyncLogStore;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Create `SyncLocks` if absent and add `syncStatus` if an older schema
/// lacks it (§4.5 step 1 -- schema upgrade never drops or reshapes an
/// existing table).
pub fn ensure_schema(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS SyncLocks (
            lockId TEXT PRIMARY KEY,
            reason TEXT NOT NULL,
            createdAt TEXT NOT NULL,
            expiresAt TEXT,
            machineName TEXT NOT NULL,
            processId INTEGER NOT NULL
        );",
    )?;
    let has_status: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('SyncLocks') WHERE name = 'syncStatus'")?
        .exists([])?;
    if !has_status {
        conn.execute("ALTER TABLE SyncLocks ADD COLUMN syncStatus TEXT NOT NULL DEFAULT 'Acquired'", [])?;
    }
    Ok(())
}

fn current_machine_name() -> String {
    System::host_name().unwrap_or_else(|| "unknown-host".to_string())
}

fn process_is_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_processes(
        sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]),
        true,
    );
    sys.process(Pid::from_u32(pid)).is_some()
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<GlobalLockRecord> {
    let created_at: String = row.get(2)?;
    let expires_at: Option<String> = row.get(3)?;
    Ok(GlobalLockRecord {
        lock_id: row.get(0)?,
        reason: row.get(1)?,
        created_at: parse_ts(&created_at),
        expires_at: expires_at.as_deref().map(parse_ts),
        machine_name: row.get(4)?,
        process_id: row.get::<_, i64>(5)? as u32,
        sync_status: row.get(6)?,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Delete rows whose `expiresAt` has passed (§4.5 step 2).
fn purge_expired(conn: &Connection, now: DateTime<Utc>) -> EngineResult<()> {
    let mut stmt = conn.prepare(
        "SELECT lockId FROM SyncLocks WHERE expiresAt IS NOT NULL AND expiresAt < ?1",
    )?;
    let expired: Vec<String> = stmt
        .query_map(params![now.to_rfc3339()], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    drop(stmt);
    conn.execute(
        "DELETE FROM SyncLocks WHERE expiresAt IS NOT NULL AND expiresAt < ?1",
        params![now.to_rfc3339()],
    )?;
    for lock_id in expired {
        SyncLogStore::record_best_effort(conn, "lock", "expired-reclaimed", &format!("lockId={lock_id}"));
    }
    Ok(())
}

/// Reclaim rows left behind by a crashed process on *this* machine (§4.5
/// step 3).
fn purge_stale_self_locks(conn: &Connection, machine: &str) -> EngineResult<()> {
    let mut stmt = conn.prepare("SELECT lockId, processId FROM SyncLocks WHERE machineName = ?1")?;
    let rows: Vec<(String, u32)> = stmt
        .query_map(params![machine], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u32))
        })?
        .collect::<Result<_, _>>()?;
    for (lock_id, pid) in rows {
        if !process_is_alive(pid) {
            conn.execute("DELETE FROM SyncLocks WHERE lockId = ?1", params![&lock_id])?;
            SyncLogStore::record_best_effort(
                conn,
                "lock",
                "stale-reclaimed",
                &format!("lockId={lock_id} pid={pid}"),
            );
        }
    }
    Ok(())
}

fn count_active(conn: &Connection, now: DateTime<Utc>) -> EngineResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM SyncLocks WHERE expiresAt IS NULL OR expiresAt > ?1",
        params![now.to_rfc3339()],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// An acquired lease. Dropping without calling [`release`](LockHandle::release)
/// leaves the row to expire naturally -- the heartbeat task is aborted on
/// drop so it never outlives the handle, but the row itself is only
/// deleted by an explicit release.
pub struct LockHandle {
    lock_id: String,
    control_path: PathBuf,
    stop_tx: Option<watch::Sender<bool>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl LockHandle {
    /// Idempotent: deletes the lock row and stops the heartbeat. Calling
    /// it twice (or after the row is already gone) is not an error.
    pub async fn release(mut self) -> EngineResult<()> {
        self.stop_heartbeat();
        let conn = Connection::open(&self.control_path)?;
        conn.execute(
            "DELETE FROM SyncLocks WHERE lockId = ?1",
            params![self.lock_id],
        )?;
        SyncLogStore::record_best_effort(&conn, "lock", "released", &format!("lockId={}", self.lock_id));
        Ok(())
    }

    fn stop_heartbeat(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }

    pub fn set_status(&self, status: &str) -> EngineResult<()> {
        let conn = Connection::open(&self.control_path)?;
        conn.execute(
            "UPDATE SyncLocks SET syncStatus = ?1 WHERE lockId = ?2",
            params![status, self.lock_id],
        )?;
        Ok(())
    }

    pub fn get_status(&self) -> EngineResult<String> {
        let conn = Connection::open(&self.control_path)?;
        let status: String = conn.query_row(
            "SELECT syncStatus FROM SyncLocks WHERE lockId = ?1",
            params![self.lock_id],
            |r| r.get(0),
        )?;
        Ok(status)
    }

    #[must_use]
    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

/// Exclusive lease manager over a tenant's control store (§4.5).
pub struct GlobalLockManager {
    config: EngineConfig,
}

impl GlobalLockManager {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Acquire the lease, polling at `lock_poll_interval` until free, the
    /// wait budget is exhausted, or `wait_budget` is zero (fail-fast).
    pub async fn acquire(
        &self,
        control_path: &Path,
        reason: &str,
        wait_budget: Duration,
        expiry: Duration,
    ) -> EngineResult<LockHandle> {
        let expiry = self.config.resolve_expiry(expiry);
        let deadline = Instant::now() + wait_budget;
        let machine = current_machine_name();
        let pid = std::process::id();

        loop {
            let outcome = self.try_acquire_once(control_path, reason, expiry, &machine, pid)?;
            if let Some(handle) = outcome {
                return Ok(handle);
            }

            if wait_budget.is_zero() || Instant::now() >= deadline {
                return Err(EngineError::LockAcquisitionError { waited: wait_budget });
            }
            tokio::time::sleep(self.config.lock_poll_interval).await;
        }
    }

    fn try_acquire_once(
        &self,
        control_path: &Path,
        reason: &str,
        expiry: Duration,
        machine: &str,
        pid: u32,
    ) -> EngineResult<Option<LockHandle>> {
        let conn = Connection::open(control_path)?;
        ensure_schema(&conn)?;
        SyncLogStore::ensure_schema(&conn)?;

        let now = Utc::now();
        purge_expired(&conn, now)?;
        purge_stale_self_locks(&conn, machine)?;

        if count_active(&conn, now)? > 0 {
            return Ok(None);
        }

        let lock_id = Uuid::new_v4().to_string();
        let expires_at = now + chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::seconds(180));
        conn.execute(
            "INSERT INTO SyncLocks (lockId, reason, createdAt, expiresAt, machineName, processId, syncStatus)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'Acquired')",
            params![
                lock_id,
                reason,
                now.to_rfc3339(),
                expires_at.to_rfc3339(),
                machine,
                i64::from(pid),
            ],
        )?;
        SyncLogStore::record_best_effort(&conn, "lock", "acquired", &format!("lockId={lock_id} reason={reason}"));

        let (stop_tx, stop_rx) = watch::channel(false);
        let heartbeat_interval = self.config.heartbeat_interval_for(expiry);
        let heartbeat = spawn_heartbeat(
            control_path.to_path_buf(),
            lock_id.clone(),
            expiry,
            heartbeat_interval,
            stop_rx,
        );

        Ok(Some(LockHandle {
            lock_id,
            control_path: control_path.to_path_buf(),
            stop_tx: Some(stop_tx),
            heartbeat: Some(heartbeat),
        }))
    }

    /// Whether any non-expired lock exists for the tenant (`isActive`).
    pub fn is_active(&self, control_path: &Path) -> EngineResult<bool> {
        if !control_path.exists() {
            return Ok(false);
        }
        let conn = Connection::open(control_path)?;
        ensure_schema(&conn)?;
        Ok(count_active(&conn, Utc::now())? > 0)
    }

    /// Poll until free or `timeout` elapses (`waitForRelease`).
    pub async fn wait_for_release(
        &self,
        control_path: &Path,
        poll_interval: Duration,
        timeout: Duration,
    ) -> EngineResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_active(control_path)? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// The full active lock record (I1: at most one row qualifies),
    /// for diagnostics beyond the bare status string.
    pub fn active_record(&self, control_path: &Path) -> EngineResult<Option<GlobalLockRecord>> {
        if !control_path.exists() {
            return Ok(None);
        }
        let conn = Connection::open(control_path)?;
        ensure_schema(&conn)?;
        conn.query_row(
            "SELECT lockId, reason, createdAt, expiresAt, machineName, processId, syncStatus
             FROM SyncLocks WHERE expiresAt IS NULL OR expiresAt > ?1",
            params![Utc::now().to_rfc3339()],
            row_to_record,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Read the `syncStatus` of whichever lock row is currently held
    /// (there is at most one active row per the exclusive-lease
    /// invariant, I1).
    pub fn current_status(&self, control_path: &Path) -> EngineResult<Option<String>> {
        let conn = Connection::open(control_path)?;
        ensure_schema(&conn)?;
        conn.query_row(
            "SELECT syncStatus FROM SyncLocks WHERE expiresAt IS NULL OR expiresAt > ?1",
            params![Utc::now().to_rfc3339()],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }
}

fn spawn_heartbeat(
    control_path: PathBuf,
    lock_id: String,
    expiry: Duration,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    // Best effort: a failed renewal is swallowed (§4.5
                    // step 5, §7 policy on best-effort paths) -- the
                    // lease simply expires if renewals keep failing.
                    if let Err(err) = renew(&control_path, &lock_id, expiry) {
                        tracing::warn!(%lock_id, error = %err, "lock heartbeat renewal failed");
                    } else {
                        tracing::debug!(%lock_id, "lock heartbeat renewed");
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

fn renew(control_path: &Path, lock_id: &str, expiry: Duration) -> EngineResult<()> {
    let conn = Connection::open(control_path)?;
    let expires_at = Utc::now() + chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::seconds(180));
    conn.execute(
        "UPDATE SyncLocks SET expiresAt = ?1 WHERE lockId = ?2",
        params![expires_at.to_rfc3339(), lock_id],
    )?;
    Ok(())
}
