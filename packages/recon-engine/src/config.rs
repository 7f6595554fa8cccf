//! `ReferentialConfig` (the external parameter map every tenant is built
//! from) and `EngineConfig` (the engine's own tunables), mirroring the
//! teacher's `ServerConfig` shape: plain data, a `Default` impl with the
//! documented defaults, and a narrow constructor surface.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Read-only key-value parameter map a tenant controller is built from.
/// Stands in for the external referential parameter service: the engine
/// never writes to it.
#[derive(Debug, Clone)]
pub struct ReferentialConfig {
    pub data_directory: String,
    pub network_directory: Option<String>,
    pub country_database_directory: String,
    pub country_database_prefix: String,
    pub ambre_database_prefix: String,
    pub dw_database_prefix: String,
    pub control_database_prefix: String,
    pub sync_tables: Vec<String>,
    pub tenants: Vec<(String, String)>,
}

impl ReferentialConfig {
    /// Build from an arbitrary key-value map, applying the documented
    /// defaults for every optional key and failing on the keys that are
    /// mandatory at tenant initialization.
    pub fn from_map(mut params: BTreeMap<String, String>) -> EngineResult<Self> {
        let data_directory = params
            .remove("DataDirectory")
            .ok_or(EngineError::Configuration {
                missing: "DataDirectory",
            })?;
        let country_database_directory =
            params
                .remove("CountryDatabaseDirectory")
                .ok_or(EngineError::Configuration {
                    missing: "CountryDatabaseDirectory",
                })?;

        let sync_tables = params
            .remove("SyncTables")
            .map(|s| s.split(',').map(str::trim).map(str::to_string).collect())
            .unwrap_or_else(|| vec!["ReconciliationTable".to_string()]);

        Ok(Self {
            data_directory,
            network_directory: params.remove("NetworkDirectory"),
            country_database_directory,
            country_database_prefix: params
                .remove("CountryDatabasePrefix")
                .unwrap_or_else(|| "DB_".to_string()),
            ambre_database_prefix: params
                .remove("AmbreDatabasePrefix")
                .unwrap_or_else(|| "DB_".to_string()),
            dw_database_prefix: params
                .remove("DWDatabasePrefix")
                .unwrap_or_else(|| "DB_".to_string()),
            control_database_prefix: params
                .remove("ControlDatabasePrefix")
                .unwrap_or_else(|| "DB_".to_string()),
            sync_tables,
            tenants: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_tenant(mut self, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        self.tenants.push((id.into(), display_name.into()));
        self
    }
}

/// The engine's own tunables, defaulted exactly as the component design
/// specifies them.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Lock acquisition poll interval (§4.5 step 6).
    pub lock_poll_interval: Duration,
    /// Default lock expiry when the caller passes zero (§4.5 `acquire`).
    pub default_lock_expiry: Duration,
    /// Floor clamp applied to a caller-supplied expiry (§4.5 `acquire`).
    pub min_lock_expiry: Duration,
    /// Heartbeat period floor (§4.5 step 5).
    pub min_heartbeat_interval: Duration,
    /// Heartbeat period ceiling (§4.5 step 5).
    pub max_heartbeat_interval: Duration,
    /// Default wait budget for a replication push (§4.7 step 2).
    pub push_wait_budget: Duration,
    /// Debounce cooldown between `pushPending` calls for a tenant (§4.7).
    pub push_cooldown: Duration,
    /// Maximum keys per CRC prefetch chunk (§4.6).
    pub crc_prefetch_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_poll_interval: Duration::from_millis(300),
            default_lock_expiry: Duration::from_secs(180),
            min_lock_expiry: Duration::from_secs(30),
            min_heartbeat_interval: Duration::from_secs(15),
            max_heartbeat_interval: Duration::from_secs(120),
            push_wait_budget: Duration::from_secs(300),
            push_cooldown: Duration::from_secs(5),
            crc_prefetch_chunk_size: 200,
        }
    }
}

impl EngineConfig {
    /// Heartbeat period for a given acquired expiry: `max(15s, min(120s, expiry/2))`.
    #[must_use]
    pub fn heartbeat_interval_for(&self, expiry: Duration) -> Duration {
        (expiry / 2).clamp(self.min_heartbeat_interval, self.max_heartbeat_interval)
    }

    /// Clamp a caller-requested expiry to the floor, substituting the
    /// default when the caller passed zero.
    #[must_use]
    pub fn resolve_expiry(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.default_lock_expiry
        } else {
            requested.max(self.min_lock_expiry)
        }
    }
}
