//! Pure, I/O-free error variants. `recon-engine::error::EngineError` wraps
//! these with the store/transport failures that only the engine can see.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("column {column:?} is not present on table {table:?}")]
    UnknownColumn { table: String, column: String },

    #[error("table {0:?} has no columns")]
    EmptyTable(String),

    #[error("value {value} cannot be coerced to {target}")]
    Coercion { value: String, target: &'static str },

    #[error("cannot compute CRC for table {0:?}: no business columns remain after exclusions")]
    NoCrcColumns(String),
}
