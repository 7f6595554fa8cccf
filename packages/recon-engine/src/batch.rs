//! C6 Batch Writer.
//!
//! Applies `toAdd`/`toUpdate`/`toArchive` lists against the local
//! reconciliation store in one transaction, reusing `rusqlite`'s own
//! prepared-statement cache (`Connection::prepare_cached`, keyed by the
//! SQL text -- which already encodes table/operation/column-signature,
//! so no separate cache is hand-rolled) and short-circuiting CRC no-op
//! updates (§4.6).

use std::collections::HashMap;

use chrono::Utc;
use recon_core::{
    compute_crc, ChangeOperation, Row, TableDescriptor, Value, COL_CRC, COL_DELETE_DATE,
    COL_IS_DELETED, COL_LAST_MODIFIED,
};
use rusqlite::{params_from_iter, Connection};

use crate::error::{EngineError, EngineResult};
use crate::schema::SchemaCache;
use crate::sqlvalue::bind;

/// Maximum keys per CRC/existence prefetch chunk (§4.6).
const CRC_PREFETCH_CHUNK_SIZE: usize = 200;

/// A row destined for a specific table.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub table: String,
    pub row: Row,
}

/// A bare reference to an existing row, used for archive/delete (only the
/// primary key is needed there).
#[derive(Debug, Clone)]
pub struct RecordRef {
    pub table: String,
    pub record_id: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub archived: usize,
    pub skipped_noop_updates: usize,
}

/// A request to [`BatchWriter::apply`]. Mirrors `apply(tenantId, toAdd,
/// toUpdate, toArchive, suppressChangeLog)` (§4.6).
#[derive(Debug, Default, Clone)]
pub struct BatchRequest {
    pub to_add: Vec<TableRow>,
    pub to_update: Vec<TableRow>,
    pub to_archive: Vec<RecordRef>,
    pub suppress_change_log: bool,
}

impl BatchRequest {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_archive.is_empty()
    }
}

pub struct BatchWriter;

impl BatchWriter {
    /// Apply `request` in a single transaction on `conn`. Appends the
    /// accumulated change-log tuples via `change_log_conn` unless
    /// `suppress_change_log` is set (import paths suppress it, §2).
    pub fn apply(
        conn: &mut Connection,
        schema: &mut SchemaCache,
        request: &BatchRequest,
        change_log_conn: &Connection,
    ) -> EngineResult<BatchOutcome> {
        if request.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let t0 = Utc::now();
        let mut outcome = BatchOutcome::default();
        let mut pending = crate::change_log::ChangeLogSession::new();

        let tx = conn.transaction()?;

        // INSERTs precede UPDATEs precede DELETEs (§5 ordering guarantee).
        for item in &request.to_add {
            let table = schema.describe(&tx, &item.table)?.clone();
            let mut row = item.row.clone();
            prepare_insert_row(&table, &mut row, t0)?;
            let record_id = primary_key_value(&table, &row)?;
            insert_row(&tx, &table, &row)?;
            pending.record(&item.table, record_id, ChangeOperation::Insert);
            outcome.inserted += 1;
        }

        for (table_name, rows) in group_by_table(&request.to_update) {
            let table = schema.describe(&tx, table_name)?.clone();
            let existing = prefetch_crc_or_existence(&tx, &table, rows.iter().map(|r| &r.row))?;

            for item in rows {
                let record_id = primary_key_value(&table, &item.row)?;
                let Some(prior_crc) = existing.get(&record_id) else {
                    return Err(EngineError::MissingPrimaryKey {
                        table: table.name.clone(),
                        record_id,
                    });
                };

                let mut row = item.row.clone();
                if table.has_column(COL_LAST_MODIFIED) {
                    row.set(COL_LAST_MODIFIED, Value::Timestamp(t0));
                }

                if table.has_column(COL_CRC) {
                    let new_crc = compute_crc(&table, &row)?;
                    if prior_crc.as_ref() == Some(&new_crc) {
                        // I4/CRC short-circuit: identical business
                        // projection, no statement executed, no log entry.
                        outcome.skipped_noop_updates += 1;
                        continue;
                    }
                    row.set(COL_CRC, Value::Int(i64::from(new_crc)));
                }

                update_row(&tx, &table, &row)?;
                pending.record(&item.table, record_id, ChangeOperation::Update);
                outcome.updated += 1;
            }
        }

        for (table_name, refs) in group_archive_by_table(&request.to_archive) {
            let table = schema.describe(&tx, table_name)?.clone();
            let existing = prefetch_existence_only(&tx, &table, refs.iter().map(|r| r.record_id.as_str()))?;

            for item in refs {
                if !existing.contains(&item.record_id) {
                    return Err(EngineError::MissingPrimaryKey {
                        table: table.name.clone(),
                        record_id: item.record_id.clone(),
                    });
                }
                archive_row(&tx, &table, &item.record_id, t0)?;
                pending.record(&item.table, item.record_id.clone(), ChangeOperation::Delete);
                outcome.archived += 1;
            }
        }

        tx.commit()?;

        if !request.suppress_change_log && !pending.is_empty() {
            pending.commit(change_log_conn)?;
        }

        Ok(outcome)
    }
}

fn group_by_table(rows: &[TableRow]) -> Vec<(&str, Vec<&TableRow>)> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&TableRow>> = HashMap::new();
    for row in rows {
        groups.entry(row.table.as_str()).or_insert_with(|| {
            order.push(row.table.as_str());
            Vec::new()
        }).push(row);
    }
    order.into_iter().map(|t| (t, groups.remove(t).unwrap())).collect()
}

fn group_archive_by_table(refs: &[RecordRef]) -> Vec<(&str, Vec<&RecordRef>)> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&RecordRef>> = HashMap::new();
    for r in refs {
        groups.entry(r.table.as_str()).or_insert_with(|| {
            order.push(r.table.as_str());
            Vec::new()
        }).push(r);
    }
    order.into_iter().map(|t| (t, groups.remove(t).unwrap())).collect()
}

fn primary_key_value(table: &TableDescriptor, row: &Row) -> EngineResult<String> {
    row.get(&table.primary_key)
        .map(std::string::ToString::to_string)
        .ok_or_else(|| EngineError::SchemaMismatch {
            table: table.name.clone(),
            column: table.primary_key.clone(),
        })
}

/// On INSERT: soft-delete flags are reset to "not deleted" and
/// `LastModified`/`CRC` are (re)computed (§4.6 pre-processing).
fn prepare_insert_row(
    table: &TableDescriptor,
    row: &mut Row,
    t0: chrono::DateTime<Utc>,
) -> EngineResult<()> {
    if table.has_column(COL_LAST_MODIFIED) {
        row.set(COL_LAST_MODIFIED, Value::Timestamp(t0));
    }
    if table.has_column(COL_IS_DELETED) {
        row.set(COL_IS_DELETED, Value::Bool(false));
    } else if table.has_column(COL_DELETE_DATE) {
        row.set(COL_DELETE_DATE, Value::Null);
    }
    if table.has_column(COL_CRC) {
        let crc = compute_crc(table, row)?;
        row.set(COL_CRC, Value::Int(i64::from(crc)));
    }
    Ok(())
}

/// Columns to bind: every column the table declares that is also present
/// on `row`. Columns on `row` the table doesn't know about are silently
/// dropped (§4.6 "schema mismatches... silently drop the offending
/// columns but keep known columns").
fn known_present_columns<'a>(table: &'a TableDescriptor, row: &Row) -> Vec<&'a str> {
    table
        .columns
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| row.contains(name))
        .collect()
}

fn insert_row(tx: &rusqlite::Transaction<'_>, table: &TableDescriptor, row: &Row) -> EngineResult<()> {
    let columns = known_present_columns(table, row);
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        placeholders.join(", ")
    );
    let mut stmt = tx.prepare_cached(&sql)?;
    let bound: Vec<_> = columns
        .iter()
        .map(|c| bind(row.get(c).unwrap_or(&Value::Null), table.column_type(c).unwrap()))
        .collect();
    stmt.execute(params_from_iter(bound.iter()))?;
    Ok(())
}

/// UPDATE of all known present columns except the primary key. When the
/// table carries a `CRC` column the `WHERE` clause repeats the guard from
/// §4.6: it binds the row's freshly computed CRC (already `row.set` at
/// the call site), not the stored CRC read during prefetch -- binding the
/// stored value would make `CRC <> ?` compare the column against itself
/// and match zero rows, the defense-in-depth guard this is meant to be
/// would instead silently discard the write.
fn update_row(tx: &rusqlite::Transaction<'_>, table: &TableDescriptor, row: &Row) -> EngineResult<()> {
    let columns: Vec<&str> = known_present_columns(table, row)
        .into_iter()
        .filter(|c| !c.eq_ignore_ascii_case(&table.primary_key))
        .collect();

    let mut idx = 1;
    let assignments: Vec<String> = columns
        .iter()
        .map(|c| {
            let s = format!("{c} = ?{idx}");
            idx += 1;
            s
        })
        .collect();

    let pk_value = primary_key_value(table, row)?;
    let mut bound: Vec<_> = columns
        .iter()
        .map(|c| bind(row.get(c).unwrap_or(&Value::Null), table.column_type(c).unwrap()))
        .collect();

    let sql = if table.has_column(COL_CRC) {
        let pk_idx = idx;
        idx += 1;
        let crc_idx = idx;
        let new_crc = row.get(COL_CRC).cloned().unwrap_or(Value::Null);
        bound.push(bind(&Value::Text(pk_value.clone()), table.column_type(&table.primary_key).unwrap()));
        bound.push(bind(&new_crc, recon_core::StorageType::Integer));
        format!(
            "UPDATE {} SET {} WHERE {} = ?{pk_idx} AND (CRC <> ?{crc_idx} OR CRC IS NULL OR ?{crc_idx} IS NULL)",
            table.name,
            assignments.join(", "),
            table.primary_key,
        )
    } else {
        bound.push(bind(&Value::Text(pk_value), table.column_type(&table.primary_key).unwrap()));
        format!(
            "UPDATE {} SET {} WHERE {} = ?{idx}",
            table.name,
            assignments.join(", "),
            table.primary_key,
        )
    };

    let mut stmt = tx.prepare_cached(&sql)?;
    stmt.execute(params_from_iter(bound.iter()))?;
    Ok(())
}

/// Soft-delete (preferred, I5) or hard DELETE when the table has neither
/// `IsDeleted` nor `DeleteDate`.
fn archive_row(
    tx: &rusqlite::Transaction<'_>,
    table: &TableDescriptor,
    record_id: &str,
    t0: chrono::DateTime<Utc>,
) -> EngineResult<()> {
    if !table.supports_soft_delete() {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", table.name, table.primary_key);
        let mut stmt = tx.prepare_cached(&sql)?;
        stmt.execute([record_id])?;
        return Ok(());
    }

    let mut assignments = Vec::new();
    let mut bound: Vec<_> = Vec::new();
    let mut idx = 1;
    if table.has_column(COL_IS_DELETED) {
        assignments.push(format!("{COL_IS_DELETED} = ?{idx}"));
        bound.push(bind(&Value::Bool(true), recon_core::StorageType::Boolean));
        idx += 1;
    }
    if table.has_column(COL_DELETE_DATE) {
        assignments.push(format!("{COL_DELETE_DATE} = ?{idx}"));
        bound.push(bind(&Value::Timestamp(t0), recon_core::StorageType::Timestamp));
        idx += 1;
    }
    if table.has_column(COL_LAST_MODIFIED) {
        assignments.push(format!("{COL_LAST_MODIFIED} = ?{idx}"));
        bound.push(bind(&Value::Timestamp(t0), recon_core::StorageType::Timestamp));
        idx += 1;
    }
    bound.push(bind(&Value::Text(record_id.to_string()), table.column_type(&table.primary_key).unwrap()));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{idx}",
        table.name,
        assignments.join(", "),
        table.primary_key,
    );
    let mut stmt = tx.prepare_cached(&sql)?;
    stmt.execute(params_from_iter(bound.iter()))?;
    Ok(())
}

/// Fetch `(pk, CRC)` for every key in `rows`, chunked to
/// `CRC_PREFETCH_CHUNK_SIZE` (§4.6). Tables without a `CRC` column get
/// `None` as the stored CRC for every present key (existence only).
fn prefetch_crc_or_existence<'a>(
    tx: &rusqlite::Transaction<'_>,
    table: &TableDescriptor,
    rows: impl Iterator<Item = &'a Row>,
) -> EngineResult<HashMap<String, Option<u32>>> {
    let keys: Vec<String> = rows
        .map(|r| primary_key_value(table, r))
        .collect::<EngineResult<_>>()?;

    let mut found = HashMap::new();
    if !table.has_column(COL_CRC) {
        for chunk in keys.chunks(CRC_PREFETCH_CHUNK_SIZE) {
            for key in existing_keys(tx, table, chunk)? {
                found.insert(key, None);
            }
        }
        return Ok(found);
    }

    for chunk in keys.chunks(CRC_PREFETCH_CHUNK_SIZE) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT {}, CRC FROM {} WHERE {} IN ({placeholders})",
            table.primary_key, table.name, table.primary_key
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| {
            let pk: String = r.get(0)?;
            let crc: Option<i64> = r.get(1)?;
            Ok((pk, crc.map(|c| c as u32)))
        })?;
        for row in rows {
            let (pk, crc) = row?;
            found.insert(pk, crc);
        }
    }
    Ok(found)
}

fn prefetch_existence_only<'a>(
    tx: &rusqlite::Transaction<'_>,
    table: &TableDescriptor,
    keys: impl Iterator<Item = &'a str>,
) -> EngineResult<std::collections::HashSet<String>> {
    let keys: Vec<String> = keys.map(str::to_string).collect();
    let mut found = std::collections::HashSet::new();
    for chunk in keys.chunks(CRC_PREFETCH_CHUNK_SIZE) {
        for key in existing_keys(tx, table, chunk)? {
            found.insert(key);
        }
    }
    Ok(found)
}

fn existing_keys(
    tx: &rusqlite::Transaction<'_>,
    table: &TableDescriptor,
    chunk: &[String],
) -> EngineResult<Vec<String>> {
    let placeholders = vec!["?"; chunk.len()].join(",");
    let sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({placeholders})",
        table.primary_key, table.name, table.primary_key
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| r.get::<_, String>(0))?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::Value;

    fn setup(schema_sql: &str) -> (Connection, Connection) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(schema_sql).unwrap();
        let log = Connection::open_in_memory().unwrap();
        crate::change_log::ChangeLogStore::ensure_schema(&log).unwrap();
        (conn, log)
    }

    #[test]
    fn insert_sets_crc_and_not_deleted() {
        let (mut conn, log) = setup(
            "CREATE TABLE T (Id TEXT PRIMARY KEY, Amount REAL, CRC INTEGER, IsDeleted INTEGER, LastModified TEXT)",
        );
        let mut row = Row::new();
        row.set("Id", Value::Text("1".into()));
        row.set("Amount", Value::Float(10.0));

        let request = BatchRequest {
            to_add: vec![TableRow { table: "T".into(), row }],
            ..Default::default()
        };

        let mut schema = SchemaCache::new();
        let outcome = BatchWriter::apply(&mut conn, &mut schema, &request, &log).unwrap();
        assert_eq!(outcome.inserted, 1);

        let (crc, deleted): (i64, i64) = conn
            .query_row("SELECT CRC, IsDeleted FROM T WHERE Id = '1'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_ne!(crc, 0);
        assert_eq!(deleted, 0);
        assert!(crate::change_log::ChangeLogStore::has_unsynced(&log).unwrap());
    }

    #[test]
    fn update_with_unchanged_business_columns_is_a_noop_p4() {
        let (mut conn, log) = setup(
            "CREATE TABLE T (Id TEXT PRIMARY KEY, Amount REAL, CRC INTEGER, LastModified TEXT)",
        );
        conn.execute(
            "INSERT INTO T (Id, Amount, CRC) VALUES ('7', 5.0, 0)",
            [],
        )
        .unwrap();
        // Compute the real CRC for Amount=5.0 and seed it, simulating a
        // row already synchronized once.
        let table = recon_core::TableDescriptor {
            name: "T".into(),
            columns: vec![
                ("Id".into(), recon_core::StorageType::Text),
                ("Amount".into(), recon_core::StorageType::Real),
                ("CRC".into(), recon_core::StorageType::Integer),
                ("LastModified".into(), recon_core::StorageType::Timestamp),
            ],
            primary_key: "Id".into(),
        };
        let mut seed_row = Row::new();
        seed_row.set("Id", Value::Text("7".into()));
        seed_row.set("Amount", Value::Float(5.0));
        let real_crc = compute_crc(&table, &seed_row).unwrap();
        conn.execute("UPDATE T SET CRC = ?1 WHERE Id = '7'", [i64::from(real_crc)])
            .unwrap();

        let mut touch_row = Row::new();
        touch_row.set("Id", Value::Text("7".into()));
        touch_row.set("Amount", Value::Float(5.0));

        let request = BatchRequest {
            to_update: vec![TableRow { table: "T".into(), row: touch_row }],
            ..Default::default()
        };
        let mut schema = SchemaCache::new();
        let outcome = BatchWriter::apply(&mut conn, &mut schema, &request, &log).unwrap();

        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.skipped_noop_updates, 1);
        assert!(!crate::change_log::ChangeLogStore::has_unsynced(&log).unwrap());
    }

    #[test]
    fn update_with_changed_business_column_writes_the_row_and_bumps_crc() {
        let (mut conn, log) = setup(
            "CREATE TABLE T (Id TEXT PRIMARY KEY, Amount REAL, CRC INTEGER, LastModified TEXT)",
        );
        conn.execute("INSERT INTO T (Id, Amount, CRC) VALUES ('7', 5.0, 0)", [])
            .unwrap();
        let table = recon_core::TableDescriptor {
            name: "T".into(),
            columns: vec![
                ("Id".into(), recon_core::StorageType::Text),
                ("Amount".into(), recon_core::StorageType::Real),
                ("CRC".into(), recon_core::StorageType::Integer),
                ("LastModified".into(), recon_core::StorageType::Timestamp),
            ],
            primary_key: "Id".into(),
        };
        let mut seed_row = Row::new();
        seed_row.set("Id", Value::Text("7".into()));
        seed_row.set("Amount", Value::Float(5.0));
        let seeded_crc = compute_crc(&table, &seed_row).unwrap();
        conn.execute("UPDATE T SET CRC = ?1 WHERE Id = '7'", [i64::from(seeded_crc)])
            .unwrap();

        let mut changed_row = Row::new();
        changed_row.set("Id", Value::Text("7".into()));
        changed_row.set("Amount", Value::Float(9.0));

        let request = BatchRequest {
            to_update: vec![TableRow { table: "T".into(), row: changed_row }],
            ..Default::default()
        };
        let mut schema = SchemaCache::new();
        let outcome = BatchWriter::apply(&mut conn, &mut schema, &request, &log).unwrap();

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.skipped_noop_updates, 0);

        let (amount, crc): (f64, i64) = conn
            .query_row("SELECT Amount, CRC FROM T WHERE Id = '7'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(amount, 9.0);

        let mut new_row = Row::new();
        new_row.set("Id", Value::Text("7".into()));
        new_row.set("Amount", Value::Float(9.0));
        let expected_crc = compute_crc(&table, &new_row).unwrap();
        assert_eq!(crc, i64::from(expected_crc));
        assert_ne!(crc, i64::from(seeded_crc));
        assert!(crate::change_log::ChangeLogStore::has_unsynced(&log).unwrap());
    }

    #[test]
    fn archive_soft_deletes_when_is_deleted_present_s4() {
        let (mut conn, log) = setup("CREATE TABLE T (Id TEXT PRIMARY KEY, IsDeleted INTEGER)");
        conn.execute("INSERT INTO T (Id, IsDeleted) VALUES ('5', 0)", []).unwrap();

        let request = BatchRequest {
            to_archive: vec![RecordRef { table: "T".into(), record_id: "5".into() }],
            ..Default::default()
        };
        let mut schema = SchemaCache::new();
        let outcome = BatchWriter::apply(&mut conn, &mut schema, &request, &log).unwrap();
        assert_eq!(outcome.archived, 1);

        let (count, deleted): (i64, i64) = conn
            .query_row("SELECT COUNT(*), IsDeleted FROM T WHERE Id = '5'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(deleted, 1);
    }

    #[test]
    fn archive_hard_deletes_when_no_soft_delete_columns_s4() {
        let (mut conn, log) = setup("CREATE TABLE T (Id TEXT PRIMARY KEY, Value TEXT)");
        conn.execute("INSERT INTO T (Id, Value) VALUES ('6', 'x')", []).unwrap();

        let request = BatchRequest {
            to_archive: vec![RecordRef { table: "T".into(), record_id: "6".into() }],
            ..Default::default()
        };
        let mut schema = SchemaCache::new();
        BatchWriter::apply(&mut conn, &mut schema, &request, &log).unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM T WHERE Id = '6'", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn unknown_primary_key_on_update_is_fatal() {
        let (mut conn, log) = setup("CREATE TABLE T (Id TEXT PRIMARY KEY, Value TEXT)");
        let mut row = Row::new();
        row.set("Id", Value::Text("missing".into()));
        row.set("Value", Value::Text("x".into()));

        let request = BatchRequest {
            to_update: vec![TableRow { table: "T".into(), row }],
            ..Default::default()
        };
        let mut schema = SchemaCache::new();
        let result = BatchWriter::apply(&mut conn, &mut schema, &request, &log);
        assert!(matches!(result, Err(EngineError::MissingPrimaryKey { .. })));
    }

    #[test]
    fn unknown_column_on_row_is_silently_dropped() {
        let (mut conn, log) = setup("CREATE TABLE T (Id TEXT PRIMARY KEY, Value TEXT)");
        let mut row = Row::new();
        row.set("Id", Value::Text("1".into()));
        row.set("Value", Value::Text("x".into()));
        row.set("NotAColumn", Value::Text("y".into()));

        let request = BatchRequest {
            to_add: vec![TableRow { table: "T".into(), row }],
            ..Default::default()
        };
        let mut schema = SchemaCache::new();
        let outcome = BatchWriter::apply(&mut conn, &mut schema, &request, &log).unwrap();
        assert_eq!(outcome.inserted, 1);
    }

    #[test]
    fn empty_request_is_a_noop() {
        let (mut conn, log) = setup("CREATE TABLE T (Id TEXT PRIMARY KEY)");
        let mut schema = SchemaCache::new();
        let outcome = BatchWriter::apply(&mut conn, &mut schema, &BatchRequest::default(), &log).unwrap();
        assert_eq!(outcome, BatchOutcome::default());
    }

    #[test]
    fn suppressed_change_log_emits_no_entries() {
        let (mut conn, log) = setup("CREATE TABLE T (Id TEXT PRIMARY KEY, Value TEXT)");
        let mut row = Row::new();
        row.set("Id", Value::Text("1".into()));
        row.set("Value", Value::Text("x".into()));

        let request = BatchRequest {
            to_add: vec![TableRow { table: "T".into(), row }],
            suppress_change_log: true,
            ..Default::default()
        };
        let mut schema = SchemaCache::new();
        BatchWriter::apply(&mut conn, &mut schema, &request, &log).unwrap();
        assert!(!crate::change_log::ChangeLogStore::has_unsynced(&log).unwrap());
    }
}
