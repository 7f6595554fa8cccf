//! C1 Schema Inspector.
//!
//! Introspects a table's columns, primary key, and declared storage types
//! via `rusqlite`'s `PRAGMA` interface, and memoizes the result for the
//! life of a higher-level operation (a batch, a push cycle) the way the
//! component design's "dynamic schema probing" note asks for.

use std::collections::HashMap;

use recon_core::{StorageType, TableDescriptor};
use rusqlite::Connection;

use crate::error::{EngineError, EngineResult};

/// Per-connection cache of table descriptors, invalidated by dropping it
/// (callers create one per batch/push cycle rather than sharing it across
/// reconnects).
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: HashMap<String, TableDescriptor>,
}

impl SchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached descriptor for `table`, introspecting and caching
    /// it on first use.
    pub fn describe(&mut self, conn: &Connection, table: &str) -> EngineResult<&TableDescriptor> {
        if !self.tables.contains_key(table) {
            let descriptor = introspect(conn, table)?;
            self.tables.insert(table.to_string(), descriptor);
        }
        Ok(self.tables.get(table).expect("just inserted"))
    }

    pub fn invalidate(&mut self, table: &str) {
        self.tables.remove(table);
    }
}

/// Introspect `table` directly, bypassing any cache.
pub fn introspect(conn: &Connection, table: &str) -> EngineResult<TableDescriptor> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut columns = Vec::new();
    let mut declared_pk: Option<(i64, String)> = None;

    let rows = stmt.query_map([], |row| {
        let cid: i64 = row.get(0)?;
        let name: String = row.get(1)?;
        let decl_type: String = row.get(2)?;
        let pk: i64 = row.get(5)?;
        Ok((cid, name, decl_type, pk))
    })?;

    for row in rows {
        let (cid, name, decl_type, pk) = row?;
        if pk > 0 {
            let is_earlier = match &declared_pk {
                Some((existing_order, _)) => pk < *existing_order,
                None => true,
            };
            if is_earlier {
                declared_pk = Some((pk, name.clone()));
            }
        }
        columns.push((name, storage_type_from_declared(&decl_type)));
        let _ = cid;
    }

    if columns.is_empty() {
        return Err(EngineError::SchemaMismatch {
            table: table.to_string(),
            column: String::new(),
        });
    }

    let primary_key = declared_pk
        .map(|(_, name)| name)
        .or_else(|| first_unique_index_column(conn, table).ok().flatten())
        .or_else(|| {
            columns
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("ID"))
                .map(|(name, _)| name.clone())
        })
        .unwrap_or_else(|| columns[0].0.clone());

    Ok(TableDescriptor {
        name: table.to_string(),
        columns,
        primary_key,
    })
}

fn first_unique_index_column(conn: &Connection, table: &str) -> EngineResult<Option<String>> {
    let mut index_stmt = conn.prepare(&format!("PRAGMA index_list({table})"))?;
    let indexes: Vec<(String, i64)> = index_stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let unique: i64 = row.get(2)?;
            Ok((name, unique))
        })?
        .collect::<Result<_, _>>()?;

    for (index_name, unique) in indexes {
        if unique == 0 {
            continue;
        }
        let mut col_stmt = conn.prepare(&format!("PRAGMA index_info({index_name})"))?;
        let mut cols = col_stmt.query_map([], |row| row.get::<_, String>(2))?;
        if let Some(first) = cols.next() {
            return Ok(Some(first?));
        }
    }
    Ok(None)
}

/// Map a SQLite declared column type string to a coarse [`StorageType`].
/// SQLite's type affinity rules are used as the tie-breaker for anything
/// not recognized outright (§4.1/§9: schema types drive binding, never
/// the row value's runtime variant).
fn storage_type_from_declared(declared: &str) -> StorageType {
    let upper = declared.to_ascii_uppercase();
    if upper.contains("INT") {
        StorageType::Integer
    } else if upper.contains("BOOL") {
        StorageType::Boolean
    } else if upper.contains("TIME") || upper.contains("DATE") {
        StorageType::Timestamp
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        StorageType::Real
    } else if upper.contains("BLOB") {
        StorageType::Blob
    } else {
        StorageType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_with(schema: &str) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(schema).unwrap();
        conn
    }

    #[test]
    fn declared_primary_key_is_found() {
        let conn = open_with(
            "CREATE TABLE T (Id INTEGER PRIMARY KEY, Name TEXT, Amount REAL, IsDeleted BOOLEAN);",
        );
        let d = introspect(&conn, "T").unwrap();
        assert_eq!(d.primary_key, "Id");
        assert_eq!(d.column_type("Amount"), Some(StorageType::Real));
        assert_eq!(d.column_type("IsDeleted"), Some(StorageType::Boolean));
    }

    #[test]
    fn falls_back_to_unique_index_then_literal_id_then_first_column() {
        let conn = open_with(
            "CREATE TABLE NoDeclaredPk (Code TEXT, Value REAL);
             CREATE UNIQUE INDEX idx_code ON NoDeclaredPk(Code);",
        );
        let d = introspect(&conn, "NoDeclaredPk").unwrap();
        assert_eq!(d.primary_key, "Code");

        let conn2 = open_with("CREATE TABLE WithId (ID INTEGER, Value REAL);");
        let d2 = introspect(&conn2, "WithId").unwrap();
        assert_eq!(d2.primary_key, "ID");

        let conn3 = open_with("CREATE TABLE Bare (First TEXT, Second TEXT);");
        let d3 = introspect(&conn3, "Bare").unwrap();
        assert_eq!(d3.primary_key, "First");
    }

    #[test]
    fn unknown_table_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(introspect(&conn, "DoesNotExist").is_err());
    }

    #[test]
    fn cache_reuses_descriptor_across_calls() {
        let conn = open_with("CREATE TABLE T (Id INTEGER PRIMARY KEY, Name TEXT);");
        let mut cache = SchemaCache::new();
        let first = cache.describe(&conn, "T").unwrap().clone();
        let second = cache.describe(&conn, "T").unwrap().clone();
        assert_eq!(first.primary_key, second.primary_key);
    }
}
