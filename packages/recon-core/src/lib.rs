//! Pure domain model and algorithms for the reconciliation sync engine:
//! the row/table/change-log/lock vocabulary, value coercion between
//! language-level values and declared storage types, and the CRC engine
//! used to short-circuit no-op writes.
//!
//! Nothing in this crate opens a file, a connection, or a socket --
//! that lives in `recon-engine`, which depends on this crate for its
//! vocabulary and pure algorithms.

pub mod coercion;
pub mod crc;
pub mod error;
pub mod model;

pub use coercion::{coerce_for_bind, coerce_from_store, normalize_for_crc};
pub use crc::{business_columns, compute as compute_crc};
pub use error::CoreError;
pub use model::{
    ChangeLogEntry, ChangeOperation, GlobalLockRecord, PendingChange, Row, StorageType, StoreKind,
    SyncAnchor, TableDescriptor, Tenant, Value, COL_CRC, COL_DELETE_DATE, COL_IS_DELETED,
    COL_LAST_MODIFIED,
};
