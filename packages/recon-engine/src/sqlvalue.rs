//! Bridges `recon_core::Value` to `rusqlite`'s dynamic `ToSql`/`FromSql`
//! value, centralizing the one error-prone surface the component design
//! calls out explicitly (§9 Design Notes): binding type is always derived
//! from the schema's declared [`StorageType`] via [`coerce_for_bind`],
//! never from the runtime `Value` variant.

use recon_core::{coerce_for_bind, coerce_from_store, StorageType, Value};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::ToSql;

/// A `Value`, pre-coerced for binding against a column declared as
/// `declared`. Implements `ToSql` so it drops straight into `params![]`.
pub struct Bound(SqlValue);

#[must_use]
pub fn bind(value: &Value, declared: StorageType) -> Bound {
    let coerced = coerce_for_bind(value, declared);
    Bound(match coerced {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(b)),
        Value::Int(i) => SqlValue::Integer(i),
        Value::Float(f) => SqlValue::Real(f),
        Value::Text(s) => SqlValue::Text(s),
        Value::Timestamp(ts) => SqlValue::Text(ts.to_rfc3339()),
    })
}

impl ToSql for Bound {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(self.0.as_ref()))
    }
}

/// Read a raw column value back and coerce it into the language-level
/// `Value` implied by `declared`.
pub fn read_column(value_ref: ValueRef<'_>, declared: StorageType) -> rusqlite::Result<Value> {
    let raw = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    };
    coerce_from_store(&raw, declared)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, value_ref.data_type(), Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{params, Connection};

    #[test]
    fn bound_bool_round_trips_as_integer() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE T (Flag INTEGER)", []).unwrap();
        conn.execute(
            "INSERT INTO T (Flag) VALUES (?1)",
            params![bind(&Value::Bool(true), StorageType::Boolean)],
        )
        .unwrap();
        let read: i64 = conn.query_row("SELECT Flag FROM T", [], |r| r.get(0)).unwrap();
        assert_eq!(read, 1);
    }

    #[test]
    fn bound_timestamp_round_trips_through_text() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE T (Ts TEXT)", []).unwrap();
        let ts = chrono::Utc::now();
        conn.execute(
            "INSERT INTO T (Ts) VALUES (?1)",
            params![bind(&Value::Timestamp(ts), StorageType::Timestamp)],
        )
        .unwrap();
        let value = conn
            .query_row("SELECT Ts FROM T", [], |r| {
                read_column(r.get_ref(0)?, StorageType::Timestamp)
            })
            .unwrap();
        assert_eq!(value.as_timestamp().unwrap(), ts);
    }
}
