//! C9 Tenant Controller.
//!
//! One owning registry of per-tenant state, in the shape of the teacher's
//! cluster membership view: a `DashMap` keyed by tenant id holding
//! per-tenant runtime state, with startup/refresh orchestration fanned out
//! from a single entry point rather than scattered across callers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use recon_core::{StoreKind, SyncAnchor};
use rusqlite::{Connection, OptionalExtension};

use crate::audit::SyncLogStore;
use crate::change_log::ChangeLogStore;
use crate::config::{EngineConfig, ReferentialConfig};
use crate::error::{EngineError, EngineResult};
use crate::lock::GlobalLockManager;
use crate::publisher::{FilePublisher, NoopCompactor};
use crate::replicator::{Replicator, TenantStorePaths};

/// File paths derived for one tenant, following `{prefix}{tenantId}.db`
/// under `{DataDirectory|NetworkDirectory}` (§3 Store descriptors).
#[derive(Debug, Clone)]
pub struct TenantPaths {
    pub tenant_id: String,
    pub local_reconciliation: PathBuf,
    pub network_reconciliation: Option<PathBuf>,
    pub local_ambre: PathBuf,
    pub network_ambre: Option<PathBuf>,
    pub local_dw: PathBuf,
    pub network_dw: Option<PathBuf>,
    pub control: PathBuf,
}

impl TenantPaths {
    #[must_use]
    pub fn derive(config: &ReferentialConfig, tenant_id: &str) -> Self {
        let local_dir = Path::new(&config.country_database_directory);
        let network_dir = config.network_directory.as_ref().map(Path::new);

        let file_for = |prefix: &str, dir: &Path| dir.join(format!("{prefix}{tenant_id}.db"));

        Self {
            tenant_id: tenant_id.to_string(),
            local_reconciliation: file_for(&config.country_database_prefix, local_dir),
            network_reconciliation: network_dir
                .map(|dir| file_for(&config.country_database_prefix, dir)),
            local_ambre: file_for(&config.ambre_database_prefix, local_dir),
            network_ambre: network_dir.map(|dir| file_for(&config.ambre_database_prefix, dir)),
            local_dw: file_for(&config.dw_database_prefix, local_dir),
            network_dw: network_dir.map(|dir| file_for(&config.dw_database_prefix, dir)),
            control: file_for(&config.control_database_prefix, local_dir),
        }
    }

    fn network_path_for(&self, kind: StoreKind) -> Option<&Path> {
        match kind {
            StoreKind::Reconciliation => self.network_reconciliation.as_deref(),
            StoreKind::Ambre => self.network_ambre.as_deref(),
            StoreKind::Dw => self.network_dw.as_deref(),
            StoreKind::Control => None,
        }
    }

    fn local_path_for(&self, kind: StoreKind) -> &Path {
        match kind {
            StoreKind::Reconciliation => &self.local_reconciliation,
            StoreKind::Ambre => &self.local_ambre,
            StoreKind::Dw => &self.local_dw,
            StoreKind::Control => &self.control,
        }
    }
}

/// Snapshot of a tenant's observable state, published via `ArcSwap` so
/// readers never block a concurrent refresh (`isGlobalLockActive`,
/// `getCurrentSyncStatus`, §4.9 Accessors).
#[derive(Debug, Clone, Default)]
pub struct TenantStatus {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_status: Option<String>,
}

struct TenantState {
    paths: TenantPaths,
    status: ArcSwap<TenantStatus>,
}

/// Outcome of `synchronize`'s fast-path check (§4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NoOp,
    Synced { applied: usize },
}

pub struct TenantController {
    referential: ReferentialConfig,
    lock_manager: Arc<GlobalLockManager>,
    replicator: Arc<Replicator>,
    publisher: FilePublisher,
    tenants: DashMap<String, Arc<TenantState>>,
    current_tenant: ArcSwap<Option<String>>,
}

impl TenantController {
    #[must_use]
    pub fn new(referential: ReferentialConfig, engine_config: EngineConfig) -> Self {
        let lock_manager = Arc::new(GlobalLockManager::new(engine_config));
        let replicator = Arc::new(Replicator::new(engine_config, lock_manager.clone()));
        Self {
            referential,
            lock_manager,
            replicator,
            publisher: FilePublisher,
            tenants: DashMap::new(),
            current_tenant: ArcSwap::new(Arc::new(None)),
        }
    }

    /// `setCurrentTenant` (§4.9): ensure the local reconciliation
    /// database exists (seeding it from the network copy if absent),
    /// register the tenant, replay any pending change log, and refresh
    /// every local snapshot. Push and refresh failures are logged but
    /// non-fatal -- only path derivation/registration errors propagate.
    pub async fn set_current_tenant(&self, tenant_id: &str) -> EngineResult<()> {
        let paths = TenantPaths::derive(&self.referential, tenant_id);

        if !paths.local_reconciliation.exists() {
            if let Some(network) = &paths.network_reconciliation {
                if network.exists() {
                    self.publisher.refresh_local_from_network(
                        network,
                        &paths.local_reconciliation,
                        &NoopCompactor,
                    )?;
                } else {
                    Connection::open(&paths.local_reconciliation)?;
                }
            } else {
                Connection::open(&paths.local_reconciliation)?;
            }
        }

        let state = Arc::new(TenantState {
            paths: paths.clone(),
            status: ArcSwap::new(Arc::new(TenantStatus::default())),
        });
        self.tenants.insert(tenant_id.to_string(), state);
        self.current_tenant
            .store(Arc::new(Some(tenant_id.to_string())));

        let control_conn = Connection::open(&paths.control)?;
        ChangeLogStore::ensure_schema(&control_conn)?;
        SyncLogStore::ensure_schema(&control_conn)?;
        if ChangeLogStore::has_unsynced(&control_conn)? {
            if let Err(err) = self.push_pending(tenant_id).await {
                tracing::warn!(tenant = %tenant_id, error = %err, "startup push failed");
            }
        }

        for kind in [StoreKind::Reconciliation, StoreKind::Ambre, StoreKind::Dw] {
            if let Some(network) = paths.network_path_for(kind) {
                SyncLogStore::record_best_effort(
                    &control_conn,
                    "refresh",
                    "started",
                    &format!("tenant={tenant_id} kind={}", kind.as_str()),
                );
                self.publisher.ensure_local_snapshot_up_to_date(
                    network,
                    paths.local_path_for(kind),
                    &NoopCompactor,
                );
                SyncLogStore::record_best_effort(
                    &control_conn,
                    "refresh",
                    "completed",
                    &format!("tenant={tenant_id} kind={}", kind.as_str()),
                );
            }
        }

        Ok(())
    }

    /// Replay pending entries for `tenant_id`, acquiring the lock here
    /// (§4.7 step 2; five-minute default wait budget per `EngineConfig`).
    pub async fn push_pending(&self, tenant_id: &str) -> EngineResult<usize> {
        let state = self.tenant_state(tenant_id)?;
        let (_tx, cancel) = tokio::sync::watch::channel(false);
        let tenant_paths = TenantStorePaths {
            tenant_id: tenant_id.to_string(),
            control: state.paths.control.clone(),
            local_reconciliation: state.paths.local_reconciliation.clone(),
            network_reconciliation: state
                .paths
                .network_reconciliation
                .clone()
                .ok_or(EngineError::Configuration {
                    missing: "NetworkDirectory",
                })?,
        };
        self.replicator.push_pending(&tenant_paths, false, cancel).await
    }

    /// `synchronize` fast path (§4.9): no-op when neither file differs by
    /// `{length, lastWriteUtc}` and the change log is empty; otherwise
    /// drive a full push+refresh cycle and record the new sync time.
    pub async fn synchronize(&self, tenant_id: &str) -> EngineResult<SyncOutcome> {
        let state = self.tenant_state(tenant_id)?;
        let control_conn = Connection::open(&state.paths.control)?;
        ChangeLogStore::ensure_schema(&control_conn)?;

        let network = state.paths.network_reconciliation.as_deref();
        let files_differ = match network {
            Some(network_path) => {
                files_differ_by_length_and_mtime(network_path, &state.paths.local_reconciliation)
                    .unwrap_or(true)
            }
            None => false,
        };

        if !files_differ && !ChangeLogStore::has_unsynced(&control_conn)? {
            return Ok(SyncOutcome::NoOp);
        }

        let applied = self.push_pending(tenant_id).await?;
        let now = Utc::now();
        state.status.store(Arc::new(TenantStatus {
            last_sync_time: Some(now),
            last_sync_status: Some("Synced".to_string()),
        }));
        set_sync_anchor(&control_conn, SyncAnchor(now))?;

        Ok(SyncOutcome::Synced { applied })
    }

    /// `isGlobalLockActive` accessor (§4.9).
    pub fn is_global_lock_active(&self, tenant_id: &str) -> EngineResult<bool> {
        let state = self.tenant_state(tenant_id)?;
        self.lock_manager.is_active(&state.paths.control)
    }

    /// `getCurrentSyncStatus` accessor (§4.9).
    pub fn get_current_sync_status(&self, tenant_id: &str) -> EngineResult<Option<String>> {
        let state = self.tenant_state(tenant_id)?;
        self.lock_manager.current_status(&state.paths.control)
    }

    /// `isNetworkSyncAvailable` accessor (§4.9): reflects presence of the
    /// configured network file, not lock state.
    #[must_use]
    pub fn is_network_sync_available(&self, tenant_id: &str) -> bool {
        self.tenants
            .get(tenant_id)
            .and_then(|state| state.paths.network_reconciliation.clone())
            .is_some_and(|p| p.exists())
    }

    #[must_use]
    pub fn local_connection_string(&self, tenant_id: &str, kind: StoreKind) -> Option<PathBuf> {
        self.tenants
            .get(tenant_id)
            .map(|state| state.paths.local_path_for(kind).to_path_buf())
    }

    #[must_use]
    pub fn current_tenant_id(&self) -> Option<String> {
        (**self.current_tenant.load()).clone()
    }

    fn tenant_state(&self, tenant_id: &str) -> EngineResult<Arc<TenantState>> {
        self.tenants
            .get(tenant_id)
            .map(|entry| entry.clone())
            .ok_or(EngineError::Configuration {
                missing: "tenant not initialized via set_current_tenant",
            })
    }
}

fn files_differ_by_length_and_mtime(network: &Path, local: &Path) -> std::io::Result<bool> {
    if !network.exists() {
        return Ok(false);
    }
    if !local.exists() {
        return Ok(true);
    }
    let net_meta = std::fs::metadata(network)?;
    let local_meta = std::fs::metadata(local)?;
    if net_meta.len() != local_meta.len() {
        return Ok(true);
    }
    Ok(net_meta.modified()? != local_meta.modified()?)
}

pub(crate) fn set_sync_anchor(conn: &Connection, anchor: SyncAnchor) -> EngineResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _SyncConfig (configKey TEXT PRIMARY KEY, configValue TEXT);",
    )?;
    conn.execute(
        "INSERT INTO _SyncConfig (configKey, configValue) VALUES ('LastSyncTimestamp', ?1)
         ON CONFLICT(configKey) DO UPDATE SET configValue = excluded.configValue",
        rusqlite::params![anchor.to_iso8601()],
    )?;
    Ok(())
}

/// Read the sync anchor (I2: monotone, control-store authoritative per
/// `DESIGN.md`'s Open Question resolution).
pub fn get_sync_anchor(conn: &Connection) -> EngineResult<Option<SyncAnchor>> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _SyncConfig (configKey TEXT PRIMARY KEY, configValue TEXT);",
    )?;
    let raw: Option<String> = conn
        .query_row(
            "SELECT configValue FROM _SyncConfig WHERE configKey = 'LastSyncTimestamp'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| SyncAnchor::parse(&s).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn referential(local_dir: &Path, network_dir: Option<&Path>) -> ReferentialConfig {
        let mut params = std::collections::BTreeMap::new();
        params.insert("DataDirectory".to_string(), local_dir.display().to_string());
        params.insert(
            "CountryDatabaseDirectory".to_string(),
            local_dir.display().to_string(),
        );
        if let Some(net) = network_dir {
            params.insert("NetworkDirectory".to_string(), net.display().to_string());
        }
        ReferentialConfig::from_map(params).unwrap()
    }

    #[test]
    fn paths_follow_prefix_tenant_id_convention() {
        let dir = tempdir().unwrap();
        let cfg = referential(dir.path(), None);
        let paths = TenantPaths::derive(&cfg, "FR");
        assert_eq!(
            paths.local_reconciliation,
            dir.path().join("DB_FR.db")
        );
        assert!(paths.network_reconciliation.is_none());
    }

    #[tokio::test]
    async fn set_current_tenant_creates_local_db_when_absent() {
        let dir = tempdir().unwrap();
        let cfg = referential(dir.path(), None);
        let controller = TenantController::new(cfg, EngineConfig::default());

        controller.set_current_tenant("FR").await.unwrap();
        let paths = TenantPaths::derive(&controller.referential, "FR");
        assert!(paths.local_reconciliation.exists());
    }

    #[tokio::test]
    async fn synchronize_is_noop_without_network_directory() {
        let dir = tempdir().unwrap();
        let cfg = referential(dir.path(), None);
        let controller = TenantController::new(cfg, EngineConfig::default());
        controller.set_current_tenant("FR").await.unwrap();

        let outcome = controller.synchronize("FR").await.unwrap();
        assert_eq!(outcome, SyncOutcome::NoOp);
    }

    #[test]
    fn sync_anchor_round_trips_through_control_store() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(get_sync_anchor(&conn).unwrap().is_none());
        let now = Utc::now();
        set_sync_anchor(&conn, SyncAnchor(now)).unwrap();
        let read = get_sync_anchor(&conn).unwrap().unwrap();
        assert_eq!(read.0, now);
    }

    #[test]
    fn network_sync_unavailable_when_tenant_not_registered() {
        let dir = tempdir().unwrap();
        let cfg = referential(dir.path(), None);
        let controller = TenantController::new(cfg, EngineConfig::default());
        assert!(!controller.is_network_sync_available("FR"));
    }
}
