//! C7 Replicator.
//!
//! Replays unsynchronized change-log entries from the local reconciliation
//! replica onto the network replica under the global lock, FIFO, then
//! marks them synced and refreshes the local replica. Grounded on
//! `andrebassi-edgeproxy`'s replication sync service (oplog replay under a
//! guard, version/cursor bookkeeping) -- its LWW conflict check is not
//! reused (`spec.md`'s Non-goals explicitly rule out field-level merge);
//! what carries over is the shape: read the pending log, apply each entry
//! transactionally, persist the high-water mark.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use recon_core::{ChangeOperation, Row, SyncAnchor, TableDescriptor, COL_DELETE_DATE, COL_IS_DELETED};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tokio::sync::{watch, Mutex};

use crate::audit::SyncLogStore;
use crate::change_log::ChangeLogStore;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::lock::GlobalLockManager;
use crate::publisher::{CompactAndRepair, FilePublisher, NoopCompactor};
use crate::schema::SchemaCache;
use crate::sqlvalue::{bind, read_column};

/// File paths a replication cycle needs for one tenant.
#[derive(Debug, Clone)]
pub struct TenantStorePaths {
    pub tenant_id: String,
    pub control: PathBuf,
    pub local_reconciliation: PathBuf,
    pub network_reconciliation: PathBuf,
}

pub struct Replicator {
    config: EngineConfig,
    lock_manager: Arc<GlobalLockManager>,
    /// Per-tenant semaphore (size 1): prevents overlapping push cycles
    /// for the same tenant (§4.7, §5).
    tenant_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Per-tenant last successful/attempted push, for the 5s debounce.
    last_push: DashMap<String, Instant>,
}

impl Replicator {
    #[must_use]
    pub fn new(config: EngineConfig, lock_manager: Arc<GlobalLockManager>) -> Self {
        Self {
            config,
            lock_manager,
            tenant_locks: DashMap::new(),
            last_push: DashMap::new(),
        }
    }

    /// Replay all pending entries for `tenant`, returning the count
    /// applied. `cancel` is polled between entries, never mid-transaction
    /// (§5 Suspension points).
    pub async fn push_pending(
        &self,
        tenant: &TenantStorePaths,
        assume_lock_held: bool,
        mut cancel: watch::Receiver<bool>,
    ) -> EngineResult<usize> {
        let sem = self
            .tenant_locks
            .entry(tenant.tenant_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let Ok(_permit) = sem.try_lock() else {
            tracing::debug!(tenant = %tenant.tenant_id, "push already in progress, skipping");
            return Ok(0);
        };

        if let Some(last) = self.last_push.get(&tenant.tenant_id) {
            if last.elapsed() < self.config.push_cooldown {
                return Ok(0);
            }
        }
        self.last_push.insert(tenant.tenant_id.clone(), Instant::now());

        let control_conn = Connection::open(&tenant.control)?;
        ChangeLogStore::ensure_schema(&control_conn)?;
        SyncLogStore::ensure_schema(&control_conn)?;
        let unsynced = ChangeLogStore::list_unsynced(&control_conn)?;
        if unsynced.is_empty() {
            return Ok(0);
        }

        SyncLogStore::record_best_effort(
            &control_conn,
            "push",
            "started",
            &format!("tenant={} pending={}", tenant.tenant_id, unsynced.len()),
        );

        let _lock_handle = if assume_lock_held {
            None
        } else {
            Some(
                self.lock_manager
                    .acquire(&tenant.control, "replication push", self.config.push_wait_budget, Duration::ZERO)
                    .await?,
            )
        };

        let local_conn = Connection::open(&tenant.local_reconciliation)?;
        let mut network_conn = Connection::open(&tenant.network_reconciliation)?;
        let mut schema_cache = SchemaCache::new();
        let mut applied_ids = Vec::new();
        let mut cancelled = false;

        {
            let tx = network_conn.transaction()?;
            for entry in &unsynced {
                if *cancel.borrow() {
                    cancelled = true;
                    break;
                }

                let table = schema_cache.describe(&tx, &entry.table_name)?.clone();
                match entry.operation {
                    ChangeOperation::Delete => {
                        apply_delete(&tx, &table, &entry.record_id)?;
                    }
                    ChangeOperation::Insert | ChangeOperation::Update => {
                        let Some(row) = select_local_row(&local_conn, &table, &entry.record_id)? else {
                            // Created elsewhere or already replaced; skip
                            // (§4.7 step 4).
                            continue;
                        };
                        if row_exists_on_network(&tx, &table, &entry.record_id)? {
                            apply_update(&tx, &table, &row)?;
                        } else {
                            apply_insert(&tx, &table, &row)?;
                        }
                    }
                }
                applied_ids.push(entry.id);

                cancel.mark_unchanged();
            }

            if cancelled {
                // §5 Cancellation: roll back rather than commit partial
                // progress -- dropping `tx` here rolls back, and no ids
                // are marked synced, so a retry re-applies everything
                // (at-most-once-success, never a partial success).
                drop(tx);
                SyncLogStore::record_best_effort(
                    &control_conn,
                    "push",
                    "cancelled",
                    &format!("tenant={} attempted={}", tenant.tenant_id, applied_ids.len()),
                );
                return Ok(0);
            }

            tx.commit().map_err(|source| EngineError::Transactional { source })?;
        }

        ChangeLogStore::mark_synced(&control_conn, &applied_ids)?;

        let publisher = FilePublisher;
        let compactor: &dyn CompactAndRepair = &NoopCompactor;
        publisher.refresh_local_from_network(
            &tenant.network_reconciliation,
            &tenant.local_reconciliation,
            compactor,
        )?;
        // §4.7 step 7 / §4.8 step 3: the anchor advances on every
        // successful refresh, not only when the caller goes through
        // `TenantController::synchronize`.
        crate::tenant::set_sync_anchor(&control_conn, SyncAnchor(chrono::Utc::now()))?;

        SyncLogStore::record_best_effort(
            &control_conn,
            "push",
            "completed",
            &format!("tenant={} applied={}", tenant.tenant_id, applied_ids.len()),
        );
        tracing::info!(
            tenant = %tenant.tenant_id,
            applied = applied_ids.len(),
            requested = unsynced.len(),
            "push cycle complete"
        );

        Ok(applied_ids.len())
    }
}

fn select_local_row(
    conn: &Connection,
    table: &TableDescriptor,
    record_id: &str,
) -> EngineResult<Option<Row>> {
    let columns: Vec<&str> = table.columns.iter().map(|(n, _)| n.as_str()).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        columns.join(", "),
        table.name,
        table.primary_key
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt
        .query_row([record_id], |sql_row| {
            let mut row = Row::new();
            for (i, (name, ty)) in table.columns.iter().enumerate() {
                let value = read_column(sql_row.get_ref(i)?, *ty)?;
                row.set(name.clone(), value);
            }
            Ok(row)
        })
        .optional()?;
    Ok(row)
}

fn row_exists_on_network(
    tx: &rusqlite::Transaction<'_>,
    table: &TableDescriptor,
    record_id: &str,
) -> EngineResult<bool> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?1",
        table.name, table.primary_key
    );
    let count: i64 = tx.query_row(&sql, [record_id], |r| r.get(0))?;
    Ok(count > 0)
}

fn apply_insert(tx: &rusqlite::Transaction<'_>, table: &TableDescriptor, row: &Row) -> EngineResult<()> {
    let columns: Vec<&str> = table
        .columns
        .iter()
        .map(|(n, _)| n.as_str())
        .filter(|c| row.contains(c))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        placeholders.join(", ")
    );
    let bound: Vec<_> = columns
        .iter()
        .map(|c| bind(row.get(c).unwrap(), table.column_type(c).unwrap()))
        .collect();
    tx.prepare_cached(&sql)?.execute(params_from_iter(bound.iter()))?;
    Ok(())
}

/// INSERTs that land on an already-present key are converted to UPDATE,
/// making a replay idempotent by construction (§5 Cancellation).
fn apply_update(tx: &rusqlite::Transaction<'_>, table: &TableDescriptor, row: &Row) -> EngineResult<()> {
    let columns: Vec<&str> = table
        .columns
        .iter()
        .map(|(n, _)| n.as_str())
        .filter(|c| row.contains(c) && !c.eq_ignore_ascii_case(&table.primary_key))
        .collect();
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c} = ?{}", i + 1))
        .collect();
    let pk_idx = columns.len() + 1;
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{pk_idx}",
        table.name,
        assignments.join(", "),
        table.primary_key
    );
    let mut bound: Vec<_> = columns
        .iter()
        .map(|c| bind(row.get(c).unwrap(), table.column_type(c).unwrap()))
        .collect();
    let pk_value = row.get(&table.primary_key).unwrap();
    bound.push(bind(pk_value, table.column_type(&table.primary_key).unwrap()));
    tx.prepare_cached(&sql)?.execute(params_from_iter(bound.iter()))?;
    Ok(())
}

fn apply_delete(tx: &rusqlite::Transaction<'_>, table: &TableDescriptor, record_id: &str) -> EngineResult<()> {
    if table.supports_soft_delete() {
        let mut assignments = Vec::new();
        if table.has_column(COL_IS_DELETED) {
            assignments.push(format!("{COL_IS_DELETED} = 1"));
        }
        if table.has_column(COL_DELETE_DATE) {
            assignments.push(format!("{COL_DELETE_DATE} = ?1"));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            table.name,
            assignments.join(", "),
            table.primary_key,
            if table.has_column(COL_DELETE_DATE) { "?2" } else { "?1" }
        );
        let now = chrono::Utc::now().to_rfc3339();
        if table.has_column(COL_DELETE_DATE) {
            tx.prepare_cached(&sql)?.execute(params_from_iter([&now, &record_id.to_string()]))?;
        } else {
            tx.prepare_cached(&sql)?.execute([record_id])?;
        }
    } else {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", table.name, table.primary_key);
        tx.prepare_cached(&sql)?.execute([record_id])?;
    }
    Ok(())
}
