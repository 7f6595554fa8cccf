//! Orchestration engine for the reconciliation sync service: schema
//! introspection, the change log, the global lock manager, the batch
//! writer, the replicator, the file publisher, and the tenant controller
//! that wires all of the above together per tenant.
//!
//! `recon-core` carries the schema-free domain model and pure algorithms;
//! everything here is the I/O-touching half, built on `rusqlite` over
//! per-tenant store files.

pub mod audit;
pub mod batch;
pub mod change_log;
pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod publisher;
pub mod replicator;
pub mod schema;
pub mod sqlvalue;
pub mod tenant;

pub use audit::SyncLogStore;
pub use batch::{BatchOutcome, BatchRequest, BatchWriter, RecordRef, TableRow};
pub use change_log::{ChangeLogSession, ChangeLogStore};
pub use config::{EngineConfig, ReferentialConfig};
pub use error::{EngineError, EngineResult};
pub use lock::{GlobalLockManager, LockHandle};
pub use publisher::{CompactAndRepair, FilePublisher, NoopCompactor};
pub use replicator::{Replicator, TenantStorePaths};
pub use schema::SchemaCache;
pub use tenant::{SyncOutcome, TenantController, TenantPaths, TenantStatus};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }

    #[test]
    fn reexports_are_accessible_from_crate_root() {
        let _ = EngineConfig::default();
        let _cache = SchemaCache::new();
        let _request = BatchRequest::default();
        let _outcome = BatchOutcome::default();
    }
}
