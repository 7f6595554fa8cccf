//! Schema-free domain model shared by every component in `recon-engine`.
//!
//! No type here knows how to open a connection or run a query; they are
//! plain data, the row/table/change-log/lock vocabulary the reconciliation
//! data model is built from. `recon-engine` is where these get bound to an
//! actual store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata columns recognized by name across every table (§3 DATA MODEL).
pub const COL_LAST_MODIFIED: &str = "LastModified";
pub const COL_IS_DELETED: &str = "IsDeleted";
pub const COL_DELETE_DATE: &str = "DeleteDate";
pub const COL_CRC: &str = "CRC";

/// A single storage-level scalar value. Carries no language-specific
/// type information; normalization between this and a store's native
/// column types is `coercion`'s job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// An ordered mapping of column name to scalar value. Column names are
/// compared case-insensitively everywhere a `Row` is consulted (§3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.columns.insert(column.into(), value);
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let key = self
            .columns
            .keys()
            .find(|k| k.eq_ignore_ascii_case(column))
            .cloned()?;
        self.columns.remove(&key)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Declared storage type of a column, as reported by a schema inspector
/// (C1). Intentionally coarse -- just enough to drive coercion (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
    Blob,
}

/// Column name, case-insensitively comparable, used as a map key without
/// losing the originally declared casing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    /// Declared column name -> storage type, in schema order.
    pub columns: Vec<(String, StorageType)>,
    pub primary_key: String,
}

impl TableDescriptor {
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(c, _)| c.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn column_type(&self, name: &str) -> Option<StorageType> {
        self.columns
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(name))
            .map(|(_, t)| *t)
    }

    /// Whether this table has either soft-delete metadata column (§3 I5).
    #[must_use]
    pub fn supports_soft_delete(&self) -> bool {
        self.has_column(COL_IS_DELETED) || self.has_column(COL_DELETE_DATE)
    }
}

/// Kind of mutation recorded in the change log (§3 / §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOperation::Insert => "INSERT",
            ChangeOperation::Update => "UPDATE",
            ChangeOperation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChangeOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(ChangeOperation::Insert),
            "UPDATE" => Ok(ChangeOperation::Update),
            "DELETE" => Ok(ChangeOperation::Delete),
            other => Err(format!("unknown change operation: {other}")),
        }
    }
}

/// An append-only change-log entry (§3, §4.4). Identity is assigned by the
/// control store, never locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub table_name: String,
    pub record_id: String,
    pub operation: ChangeOperation,
    pub timestamp: DateTime<Utc>,
    pub synchronized: bool,
}

/// A pending, not-yet-assigned change-log entry, as produced by the batch
/// writer before it is appended (C4 `append`/`appendBatch`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub table_name: String,
    pub record_id: String,
    pub operation: ChangeOperation,
}

/// The exclusive-lease row held by the global lock manager (§3, §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalLockRecord {
    pub lock_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub machine_name: String,
    pub process_id: u32,
    pub sync_status: String,
}

impl GlobalLockRecord {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(exp) => exp > now,
        }
    }
}

/// The `LastSyncTimestamp` sync anchor (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAnchor(pub DateTime<Utc>);

impl SyncAnchor {
    #[must_use]
    pub fn to_iso8601(self) -> String {
        self.0.to_rfc3339()
    }

    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| SyncAnchor(dt.with_timezone(&Utc)))
    }
}

/// A tenant ("country"): isolation unit, one set of stores per tenant (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub display_name: String,
    pub bic: Option<String>,
    pub service_code: Option<String>,
}

/// The logical store kind a path/connection refers to (§3 Store
/// descriptors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKind {
    Ambre,
    Reconciliation,
    Dw,
    Control,
}

impl StoreKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Ambre => "ambre",
            StoreKind::Reconciliation => "reconciliation",
            StoreKind::Dw => "dw",
            StoreKind::Control => "control",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
