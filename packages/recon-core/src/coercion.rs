//! C2 Value Coercion.
//!
//! Normalizes between language-level [`Value`]s and the storage
//! representation a target column declares (`StorageType`, from C1).
//! Binding type is always derived from the schema's declared type, never
//! from the runtime `Value` variant -- that is why every function here
//! takes a `StorageType` parameter rather than matching solely on
//! `value`.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::CoreError;
use crate::model::{StorageType, Value};

/// Coerce a value for binding to a column declared as `declared`.
///
/// - `Value::Null` always passes through as storage null.
/// - Booleans bind as `0`/`1` integers.
/// - Timestamps bind as RFC 3339 UTC text (the common denominator for
///   stores that accept either numeric or string date parameters, per
///   §4.2 -- a numeric-native store's driver layer converts the text
///   further; that conversion is a storage-engine concern, not this
///   crate's).
/// - Decimals/floats bind using their native type.
/// - Everything else passes through unchanged.
#[must_use]
pub fn coerce_for_bind(value: &Value, declared: StorageType) -> Value {
    match (value, declared) {
        (Value::Null, _) => Value::Null,
        (Value::Bool(b), _) => Value::Int(i64::from(*b)),
        (Value::Timestamp(ts), StorageType::Timestamp) => Value::Text(ts.to_rfc3339()),
        (Value::Text(s), StorageType::Boolean) => {
            Value::Int(i64::from(s == "1" || s.eq_ignore_ascii_case("true")))
        }
        (other, _) => other.clone(),
    }
}

/// Coerce a raw value read back from storage into the language-level
/// representation implied by `declared`.
///
/// Accepts both numeric and string encodings for timestamp/boolean
/// columns, since different storage engines disagree on which they use
/// natively (§4.2).
pub fn coerce_from_store(raw: &Value, declared: StorageType) -> Result<Value, CoreError> {
    match (raw, declared) {
        (Value::Null, _) => Ok(Value::Null),
        (_, StorageType::Boolean) => Ok(Value::Bool(raw.as_bool().ok_or_else(|| {
            CoreError::Coercion {
                value: raw.to_string(),
                target: "boolean",
            }
        })?)),
        (Value::Text(s), StorageType::Timestamp) => parse_timestamp_text(s)
            .map(Value::Timestamp)
            .ok_or_else(|| CoreError::Coercion {
                value: s.clone(),
                target: "timestamp",
            }),
        (Value::Int(millis), StorageType::Timestamp) => Utc
            .timestamp_millis_opt(*millis)
            .single()
            .map(Value::Timestamp)
            .ok_or_else(|| CoreError::Coercion {
                value: millis.to_string(),
                target: "timestamp",
            }),
        (other, _) => Ok(other.clone()),
    }
}

fn parse_timestamp_text(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Fall back to a bare "YYYY-MM-DD HH:MM:SS" form, as SQLite's
    // CURRENT_TIMESTAMP and many legacy exporters produce.
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Normalize a single field value to the exact string C3's CRC engine
/// hashes (§4.3): trimmed strings; RFC 3339 UTC timestamps; `"0"`/`"1"`
/// booleans; full-precision invariant decimals; empty string for null.
#[must_use]
pub fn normalize_for_crc(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float_invariant(*f),
        Value::Text(s) => s.trim().to_string(),
        Value::Timestamp(ts) => ts.to_rfc3339(),
    }
}

/// Format a 64-bit float with the 17 significant digits needed for an
/// exact round trip, independent of locale (§4.3: "invariant-culture,
/// full precision (17 digits for 64-bit ...)").
fn format_float_invariant(f: f64) -> String {
    let mut s = format!("{f:.17e}");
    // `{:.17e}` always emits scientific notation; reformat plain decimals
    // back for anything in a normal business-data range so that CRCs stay
    // stable across equivalent representations (`1.0` vs `1e0`).
    if let Ok(parsed) = s.parse::<f64>() {
        if parsed == f {
            let plain = format!("{f}");
            if plain.parse::<f64>() == Ok(f) {
                s = plain;
            }
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    #[test]
    fn null_passes_through_regardless_of_declared_type() {
        for ty in [
            StorageType::Integer,
            StorageType::Boolean,
            StorageType::Timestamp,
        ] {
            assert_eq!(coerce_for_bind(&Value::Null, ty), Value::Null);
        }
    }

    #[test]
    fn bool_binds_as_integer() {
        assert_eq!(
            coerce_for_bind(&Value::Bool(true), StorageType::Boolean),
            Value::Int(1)
        );
        assert_eq!(
            coerce_for_bind(&Value::Bool(false), StorageType::Boolean),
            Value::Int(0)
        );
    }

    #[test]
    fn timestamp_binds_as_rfc3339_text() {
        let ts = Utc::now();
        let bound = coerce_for_bind(&Value::Timestamp(ts), StorageType::Timestamp);
        assert_eq!(bound, Value::Text(ts.to_rfc3339()));
    }

    #[test]
    fn read_back_integer_as_boolean() {
        let v = coerce_from_store(&Value::Int(1), StorageType::Boolean).unwrap();
        assert_eq!(v, Value::Bool(true));
        let v = coerce_from_store(&Value::Int(0), StorageType::Boolean).unwrap();
        assert_eq!(v, Value::Bool(false));
    }

    #[test]
    fn read_back_text_timestamp() {
        let ts = Utc::now();
        let text = Value::Text(ts.to_rfc3339());
        let v = coerce_from_store(&text, StorageType::Timestamp).unwrap();
        assert_eq!(v.as_timestamp().unwrap(), ts);
    }

    #[test]
    fn read_back_numeric_timestamp() {
        let millis = 1_700_000_000_000_i64;
        let v = coerce_from_store(&Value::Int(millis), StorageType::Timestamp).unwrap();
        assert_eq!(
            v.as_timestamp().unwrap(),
            Utc.timestamp_millis_opt(millis).unwrap()
        );
    }

    #[test]
    fn normalize_for_crc_matches_spec_rules() {
        assert_eq!(normalize_for_crc(&Value::Null), "");
        assert_eq!(normalize_for_crc(&Value::Bool(true)), "1");
        assert_eq!(normalize_for_crc(&Value::Bool(false)), "0");
        assert_eq!(normalize_for_crc(&Value::Text("  hi  ".into())), "hi");
    }

    #[test]
    fn normalize_for_crc_float_round_trips() {
        let rendered = normalize_for_crc(&Value::Float(3.14));
        let parsed: f64 = rendered.parse().unwrap();
        assert!((parsed - 3.14).abs() < f64::EPSILON);
    }
}
