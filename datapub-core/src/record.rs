//! Row records

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{DatapubError, DatapubResult};

/// One row of tabular data as a column-name-to-value mapping. Values are
/// plain JSON scalars; `null` marks a missing value.
pub type Record = Map<String, Value>;

/// Set of column names used anywhere across a record batch.
pub fn used_columns(records: &[Record]) -> BTreeSet<String> {
    let mut columns = BTreeSet::new();
    for record in records {
        for name in record.keys() {
            columns.insert(name.clone());
        }
    }
    columns
}

/// Interpret a JSON value as a record batch.
///
/// Only an array of objects is accepted; anything else fails before any
/// network call is made.
pub fn records_from_value(value: Value) -> DatapubResult<Vec<Record>> {
    let rows = match value {
        Value::Array(rows) => rows,
        _ => {
            return Err(DatapubError::ClientSide(
                "data must be a list of record objects".to_string(),
            ))
        }
    };
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match row {
            Value::Object(record) => records.push(record),
            other => {
                return Err(DatapubError::ClientSide(format!(
                    "data rows must be objects, got: {other}"
                )))
            }
        }
    }
    Ok(records)
}
