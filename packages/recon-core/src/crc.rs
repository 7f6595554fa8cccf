//! C3 CRC Engine.
//!
//! A stable CRC32 over the normalized business-column projection of a row.
//! This is *not* the IEEE/ISO-HDLC CRC-32 that `zlib`/`crc32fast` compute
//! -- it uses the same polynomial (`0xEDB88320`, reflected) but
//! initializes the register to `0` and applies no final XOR. No registry
//! crate exposes that combination, so the table and update loop live
//! here.
//!
//! This checksum has exactly one job: short-circuit no-op writes. It is
//! not a security boundary.

use crate::coercion::normalize_for_crc;
use crate::error::CoreError;
use crate::model::{Row, TableDescriptor};

/// Unit separator placed between normalized field values before hashing.
const FIELD_SEPARATOR: u8 = 0x1F;

/// Columns excluded from the CRC projection regardless of table (§4.3).
const EXCLUDED_COLUMNS: &[&str] = &[
    "CRC",
    "LastModified",
    "IsDeleted",
    "DeleteDate",
    "CreationDate",
    "ModifiedBy",
    "Version",
];

fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Lazily-built, process-wide CRC table. Computing it per call would be
/// wasteful but harmless; caching it avoids that without reaching for a
/// `const fn`-generated table (stable but noisier to read).
fn table() -> &'static [u32; 256] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

/// Update a running CRC with a byte slice. `crc` starts at `0` for a
/// fresh computation and is never finalized with an XOR.
fn update(mut crc: u32, bytes: &[u8]) -> u32 {
    let table = table();
    for &b in bytes {
        let idx = ((crc ^ u32::from(b)) & 0xFF) as usize;
        crc = table[idx] ^ (crc >> 8);
    }
    crc
}

/// The canonical, case-insensitive-sorted set of business columns for a
/// table: every declared column minus the primary key and the excluded
/// metadata columns (§4.3).
#[must_use]
pub fn business_columns(table: &TableDescriptor) -> Vec<&str> {
    let mut cols: Vec<&str> = table
        .columns
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| !name.eq_ignore_ascii_case(&table.primary_key))
        .filter(|name| !EXCLUDED_COLUMNS.iter().any(|ex| name.eq_ignore_ascii_case(ex)))
        .collect();
    cols.sort_by_key(|name| name.to_ascii_lowercase());
    cols
}

/// Compute the CRC32 of `row`'s business-column projection for `table`.
///
/// Columns absent from `row` are treated as null (empty string once
/// normalized), matching how a freshly-read row with no value set for an
/// optional column would normalize.
pub fn compute(table: &TableDescriptor, row: &Row) -> Result<u32, CoreError> {
    let columns = business_columns(table);
    if columns.is_empty() {
        return Err(CoreError::NoCrcColumns(table.name.clone()));
    }

    let mut crc = 0u32;
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            crc = update(crc, &[FIELD_SEPARATOR]);
        }
        let normalized = match row.get(column) {
            Some(value) => normalize_for_crc(value),
            None => String::new(),
        };
        crc = update(crc, normalized.as_bytes());
    }
    Ok(crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StorageType, Value};

    fn table_with_columns(cols: &[(&str, StorageType)]) -> TableDescriptor {
        TableDescriptor {
            name: "T".into(),
            columns: cols.iter().map(|(n, t)| ((*n).to_string(), *t)).collect(),
            primary_key: "ID".into(),
        }
    }

    #[test]
    fn business_columns_excludes_pk_and_metadata() {
        let t = table_with_columns(&[
            ("ID", StorageType::Integer),
            ("Amount", StorageType::Real),
            ("CRC", StorageType::Integer),
            ("LastModified", StorageType::Timestamp),
            ("IsDeleted", StorageType::Boolean),
        ]);
        let cols = business_columns(&t);
        assert_eq!(cols, vec!["Amount"]);
    }

    #[test]
    fn business_columns_are_sorted_case_insensitively() {
        let t = table_with_columns(&[
            ("ID", StorageType::Integer),
            ("zeta", StorageType::Text),
            ("Alpha", StorageType::Text),
            ("beta", StorageType::Text),
        ]);
        assert_eq!(business_columns(&t), vec!["Alpha", "beta", "zeta"]);
    }

    #[test]
    fn equal_projections_yield_equal_crc_i4() {
        let t = table_with_columns(&[
            ("ID", StorageType::Integer),
            ("Name", StorageType::Text),
            ("Amount", StorageType::Real),
        ]);

        let mut r1 = Row::new();
        r1.set("ID", Value::Int(1));
        r1.set("Name", Value::Text("  Alice  ".into()));
        r1.set("Amount", Value::Float(10.5));

        let mut r2 = Row::new();
        r2.set("ID", Value::Int(999)); // PK differs, must not affect CRC
        r2.set("Name", Value::Text("Alice".into())); // pre-trimmed
        r2.set("Amount", Value::Float(10.5));

        assert_eq!(compute(&t, &r1).unwrap(), compute(&t, &r2).unwrap());
    }

    #[test]
    fn differing_business_column_changes_crc() {
        let t = table_with_columns(&[("ID", StorageType::Integer), ("Amount", StorageType::Real)]);

        let mut r1 = Row::new();
        r1.set("ID", Value::Int(1));
        r1.set("Amount", Value::Float(10.0));

        let mut r2 = r1.clone();
        r2.set("Amount", Value::Float(20.0));

        assert_ne!(compute(&t, &r1).unwrap(), compute(&t, &r2).unwrap());
    }

    #[test]
    fn missing_column_normalizes_as_null() {
        let t = table_with_columns(&[("ID", StorageType::Integer), ("Amount", StorageType::Real)]);

        let mut r1 = Row::new();
        r1.set("ID", Value::Int(1));
        r1.set("Amount", Value::Null);

        let r2 = {
            let mut r = Row::new();
            r.set("ID", Value::Int(1));
            r
        };

        assert_eq!(compute(&t, &r1).unwrap(), compute(&t, &r2).unwrap());
    }

    #[test]
    fn no_business_columns_is_an_error() {
        let t = table_with_columns(&[("ID", StorageType::Integer), ("CRC", StorageType::Integer)]);
        let row = Row::new();
        assert!(compute(&t, &row).is_err());
    }

    #[test]
    fn known_vector_matches_hand_computed_value() {
        // A single-field, single-byte-value table lets us hand-verify the
        // init=0/no-xorout CRC-32 against the textbook bitwise algorithm.
        let t = table_with_columns(&[("ID", StorageType::Integer), ("Flag", StorageType::Text)]);
        let mut row = Row::new();
        row.set("ID", Value::Int(1));
        row.set("Flag", Value::Text("1".into()));

        // Reference: CRC-32 (init=0, no xorout, poly 0xEDB88320) of the
        // single byte b'1' (0x31).
        fn bitwise_crc32_init0_noxorout(bytes: &[u8]) -> u32 {
            let mut crc = 0u32;
            for &b in bytes {
                crc ^= u32::from(b);
                for _ in 0..8 {
                    crc = if crc & 1 != 0 {
                        (crc >> 1) ^ 0xEDB8_8320
                    } else {
                        crc >> 1
                    };
                }
            }
            crc
        }

        assert_eq!(compute(&t, &row).unwrap(), bitwise_crc32_init0_noxorout(b"1"));
    }
}
