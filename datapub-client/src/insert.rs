//! Bulk insert pipeline.
//!
//! Records are validated against the table's declared columns, split
//! into batches, and uploaded strictly sequentially. A batch that fails
//! with a server-side error is retried immediately up to the configured
//! limit; any other failure aborts the whole upload at once. The
//! pipeline's result is the table's row count as reported by the
//! platform afterwards, so a caller sees server truth rather than a
//! locally accumulated number.

use std::collections::BTreeSet;

use reqwest::Method;
use serde_json::{json, Value};

use datapub_core::{used_columns, DatapubError, DatapubResult, Record};

use crate::client::DatapubClient;

/// How a batch travels to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMethod {
    /// POST to the plain rows endpoint, one request per batch.
    #[default]
    Api,
    /// One advanced session per batch, committed on success and rolled
    /// back on failure.
    Advanced,
}

impl DatapubClient {
    /// Upload records in batches and return the table's row count as
    /// confirmed by the platform afterwards.
    ///
    /// `batch_size` falls back to the configured default; 0 sends
    /// everything as a single batch. Validation failures (a record
    /// naming a column the table does not have) abort before any insert
    /// request is sent.
    pub fn insert_into_table(
        &self,
        table: &str,
        records: &[Record],
        schema: Option<&str>,
        batch_size: Option<usize>,
        method: InsertMethod,
    ) -> DatapubResult<u64> {
        let definition = self.get_table_definition(table, schema)?;
        let known: BTreeSet<&str> = definition
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        let used = used_columns(records);
        let unknown: Vec<&str> = used
            .iter()
            .map(String::as_str)
            .filter(|name| !known.contains(name))
            .collect();
        if !unknown.is_empty() {
            return Err(DatapubError::ClientSide(format!(
                "columns not in table: {}",
                unknown.join(", ")
            )));
        }

        if records.is_empty() {
            tracing::warn!(table = %table, "no records to insert");
            return self.count_rows(table, schema);
        }

        let mut records = records.to_vec();
        backfill_first_record(&mut records, &used);

        let batch_size = batch_size.unwrap_or(self.config().batch_size);
        let batches = partition_batches(&records, batch_size);
        let total_batches = batches.len();
        let mut uploaded = 0usize;
        for (index, batch) in batches.iter().enumerate() {
            tracing::info!(
                batch = index + 1,
                total_batches,
                uploaded,
                total = records.len(),
                "uploading batch"
            );
            self.insert_batch_with_retries(table, batch, schema, method)?;
            uploaded += batch.len();
        }

        self.count_rows(table, schema)
    }

    fn insert_batch_with_retries(
        &self,
        table: &str,
        batch: &[Record],
        schema: Option<&str>,
        method: InsertMethod,
    ) -> DatapubResult<()> {
        let attempts = self.config().insert_retries + 1;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.insert_batch(table, batch, schema, method) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_server_side() => {
                    tracing::debug!(attempt, attempts, error = %err, "server-side error on batch insert");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error
            .unwrap_or_else(|| DatapubError::ServerSide("insert retries exhausted".to_string())))
    }

    fn insert_batch(
        &self,
        table: &str,
        batch: &[Record],
        schema: Option<&str>,
        method: InsertMethod,
    ) -> DatapubResult<()> {
        match method {
            InsertMethod::Api => {
                let url = format!("{}rows/new", self.table_api_url(table, schema));
                let values: Vec<Value> = batch
                    .iter()
                    .map(|record| Value::Object(record.clone()))
                    .collect();
                let body = json!({"query": values});
                self.request(Method::POST, &url, 201, Some(&body))?;
                Ok(())
            }
            InsertMethod::Advanced => self.with_advanced_session(|session| {
                session.insert_into_table(table, batch, schema)?;
                Ok(())
            }),
        }
    }
}

/// The platform infers a batch's columns from the first record's keys
/// alone. Give the first record an explicit null for every column used
/// elsewhere in the batch so the advertised column set is complete.
/// Remove once the platform derives columns from all records.
fn backfill_first_record(records: &mut [Record], used: &BTreeSet<String>) {
    if let Some(first) = records.first_mut() {
        for name in used {
            if !first.contains_key(name) {
                first.insert(name.clone(), Value::Null);
            }
        }
    }
}

/// Split records into consecutive batches of at most `batch_size`.
/// A size of 0 puts everything into one batch.
fn partition_batches(records: &[Record], batch_size: usize) -> Vec<&[Record]> {
    if records.is_empty() {
        return Vec::new();
    }
    if batch_size == 0 {
        return vec![records];
    }
    records.chunks(batch_size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use datapub_core::records_from_value;

    fn sample_records(count: usize) -> Vec<Record> {
        let rows: Vec<Value> = (0..count).map(|i| json!({"id": i})).collect();
        records_from_value(Value::Array(rows)).unwrap()
    }

    #[test]
    fn test_partition_sizes() {
        let records = sample_records(5);
        let batches = partition_batches(&records, 2);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_partition_keeps_order_and_records() {
        let records = sample_records(5);
        let batches = partition_batches(&records, 2);
        let flattened: Vec<Record> = batches.concat();
        assert_eq!(flattened, records);
    }

    #[test]
    fn test_partition_zero_is_single_batch() {
        let records = sample_records(5);
        let batches = partition_batches(&records, 0);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 5);
    }

    #[test]
    fn test_partition_empty_is_no_batches() {
        assert!(partition_batches(&[], 10).is_empty());
        assert!(partition_batches(&[], 0).is_empty());
    }

    #[test]
    fn test_backfill_completes_first_record() {
        let mut records = records_from_value(json!([
            {"a": 1},
            {"a": 2, "b": 3}
        ]))
        .unwrap();
        let used = used_columns(&records);
        backfill_first_record(&mut records, &used);
        assert_eq!(records[0].get("b"), Some(&Value::Null));
        assert_eq!(records[0].get("a"), Some(&json!(1)));
        assert_eq!(records[1].get("b"), Some(&json!(3)));
    }

    #[test]
    fn test_backfill_leaves_complete_first_record_alone() {
        let mut records = records_from_value(json!([
            {"a": 1, "b": 2},
            {"a": 3}
        ]))
        .unwrap();
        let before = records[0].clone();
        let used = used_columns(&records);
        backfill_first_record(&mut records, &used);
        assert_eq!(records[0], before);
    }

    #[test]
    fn test_backfill_on_empty_batch_is_noop() {
        let mut records: Vec<Record> = Vec::new();
        backfill_first_record(&mut records, &BTreeSet::new());
        assert!(records.is_empty());
    }
}
