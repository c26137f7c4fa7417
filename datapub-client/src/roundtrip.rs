//! End-to-end self test against a live platform.
//!
//! Used by the CLI's `test` subcommand to verify that a token and host
//! actually work: create a throwaway table, run every main operation
//! against it, and drop it again regardless of what happened in
//! between.

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};

use datapub_core::{records_from_value, DatapubError, DatapubResult, Record};

use crate::client::DatapubClient;
use crate::insert::InsertMethod;

fn test_definition() -> Value {
    json!({
        "columns": [
            {"name": "id", "data_type": "bigint", "is_nullable": false, "primary_key": true},
            {"name": "field1", "data_type": "varchar(128)", "is_nullable": false},
            {"name": "field2", "data_type": "integer", "is_nullable": true}
        ]
    })
}

fn test_records() -> DatapubResult<Vec<Record>> {
    records_from_value(json!([
        {"id": 1, "field1": "test", "field2": 100},
        {"id": 2, "field1": "test2", "field2": null}
    ]))
}

/// Run the full create/insert/select/metadata/drop cycle on a table
/// whose name embeds a timestamp and a random suffix so parallel runs
/// cannot collide. The table is dropped even when a step fails; a step
/// failure takes precedence over a drop failure in the result.
pub fn roundtrip(client: &DatapubClient, schema: Option<&str>) -> DatapubResult<()> {
    let table = format!(
        "test_{}_{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        rand::thread_rng().gen_range(100_000..1_000_000)
    );
    tracing::info!(table = %table, "starting round trip test");

    client.create_table(&table, &test_definition(), schema)?;
    let outcome = run_operations(client, &table, schema);
    let dropped = client.drop_table(&table, schema);
    if outcome.is_ok() {
        tracing::info!(table = %table, "round trip test passed");
    }
    outcome.and(dropped)
}

fn run_operations(client: &DatapubClient, table: &str, schema: Option<&str>) -> DatapubResult<()> {
    let records = test_records()?;

    let count = client.insert_into_table(table, &records, schema, None, InsertMethod::default())?;
    if count != records.len() as u64 {
        return Err(DatapubError::ClientSide(format!(
            "inserted {} records but the platform reports {count} rows",
            records.len()
        )));
    }

    let rows = client.select_from_table(table, schema, &[])?;
    if !same_records(records, rows) {
        return Err(DatapubError::ClientSide(
            "selected rows do not match the inserted records".to_string(),
        ));
    }

    let metadata = json!({
        "description": "connectivity test table",
        "keywords": ["test"]
    });
    let stored = client.set_metadata(table, &metadata, schema)?;
    if stored.get("id").is_none() {
        return Err(DatapubError::ClientSide(
            "stored metadata has no id".to_string(),
        ));
    }

    Ok(())
}

/// Order-insensitive record set comparison.
fn same_records(mut expected: Vec<Record>, mut actual: Vec<Record>) -> bool {
    let key = |record: &Record| {
        serde_json::to_string(&Value::Object(record.clone())).unwrap_or_default()
    };
    expected.sort_by_key(key);
    actual.sort_by_key(key);
    expected == actual
}
