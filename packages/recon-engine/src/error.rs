//! Engine-level error taxonomy. Wraps [`recon_core::CoreError`] plus the
//! I/O and store failures only the engine sees, with explicit variants
//! for every error kind the coordination engine surfaces to a caller.

use std::time::Duration;

use recon_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to acquire the global lock after waiting {waited:?}")]
    LockAcquisitionError { waited: Duration },

    #[error("transient store error: {source}")]
    TransientStore {
        #[source]
        source: rusqlite::Error,
    },

    #[error("column {column:?} is not present on table {table:?}")]
    SchemaMismatch { table: String, column: String },

    #[error("no row with primary key {record_id:?} on table {table:?}")]
    MissingPrimaryKey { table: String, record_id: String },

    #[error("transaction failed: {source}")]
    Transactional {
        #[source]
        source: rusqlite::Error,
    },

    #[error("publish/refresh failed: {source}")]
    Publish {
        #[source]
        source: std::io::Error,
    },

    #[error("missing required configuration: {missing}")]
    Configuration { missing: &'static str },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<rusqlite::Error> for EngineError {
    fn from(source: rusqlite::Error) -> Self {
        EngineError::TransientStore { source }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(source: std::io::Error) -> Self {
        EngineError::Publish { source }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
