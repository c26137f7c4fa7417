//! Advanced API sessions.
//!
//! The platform layers an explicit connection+cursor protocol over
//! stateless HTTP for transactional work: open a connection, open a
//! cursor, run commands, commit or roll back, close both. The session
//! here is a scoped, single-owner resource: it can only be obtained
//! through [`DatapubClient::with_advanced_session`], which guarantees
//! the release steps on every exit path.

use reqwest::Method;
use serde_json::{json, Map, Value};

use datapub_core::{DatapubError, DatapubResult, Record};

use crate::client::DatapubClient;

/// An open connection+cursor pair on the platform.
///
/// Every command automatically carries the session's `connection_id`
/// and `cursor_id` in its payload. Commands issued after the scope ends
/// are impossible since the session only lives inside the scope.
pub struct AdvancedSession<'a> {
    client: &'a DatapubClient,
    api_url: String,
    connection_id: Option<Value>,
    cursor_id: Option<Value>,
}

impl DatapubClient {
    /// Run `body` inside an advanced session with guaranteed release.
    ///
    /// Entering opens a connection and then a cursor. When `body`
    /// returns `Ok` the transaction is committed, otherwise it is rolled
    /// back; cursor and connection are then closed on every path. A
    /// failed rollback or close is logged and never replaces the error
    /// from `body`, while a failed commit after a successful `body` does
    /// propagate.
    pub fn with_advanced_session<T, F>(&self, body: F) -> DatapubResult<T>
    where
        F: FnOnce(&mut AdvancedSession<'_>) -> DatapubResult<T>,
    {
        let mut session = AdvancedSession::new(self);
        session.open()?;
        let outcome = body(&mut session);
        session.finish(outcome)
    }
}

impl<'a> AdvancedSession<'a> {
    fn new(client: &'a DatapubClient) -> Self {
        AdvancedSession {
            api_url: format!("{}advanced/", client.config().api_url()),
            client,
            connection_id: None,
            cursor_id: None,
        }
    }

    /// POST one command under `advanced/`, attaching the session ids.
    pub fn command(&self, command: &str, query: Option<&Value>) -> DatapubResult<Value> {
        let url = format!("{}{}", self.api_url, command);
        let mut body = Map::new();
        if let Some(connection_id) = &self.connection_id {
            body.insert("connection_id".to_string(), connection_id.clone());
        }
        if let Some(cursor_id) = &self.cursor_id {
            body.insert("cursor_id".to_string(), cursor_id.clone());
        }
        if let Some(query) = query {
            body.insert("query".to_string(), query.clone());
        }
        self.client
            .request(Method::POST, &url, 200, Some(&Value::Object(body)))
    }

    fn open(&mut self) -> DatapubResult<()> {
        let response = self.command("connection/open", None)?;
        self.connection_id = Some(session_id(&response, "connection_id")?);
        if let Err(err) = self.open_cursor() {
            // the connection is live and must not leak
            self.close_connection();
            return Err(err);
        }
        tracing::debug!("advanced session opened");
        Ok(())
    }

    fn open_cursor(&mut self) -> DatapubResult<()> {
        let response = self.command("cursor/open", None)?;
        self.cursor_id = Some(session_id(&response, "cursor_id")?);
        Ok(())
    }

    /// Settle the transaction according to `outcome`, then close cursor
    /// and connection. Cleanup failures are logged and do not replace an
    /// error coming from the session body.
    fn finish<T>(&mut self, outcome: DatapubResult<T>) -> DatapubResult<T> {
        let outcome = match outcome {
            Ok(value) => match self.command("connection/commit", None) {
                Ok(_) => Ok(value),
                Err(err) => {
                    tracing::error!(error = %err, "commit failed");
                    Err(err)
                }
            },
            Err(err) => {
                if let Err(rollback_err) = self.command("connection/rollback", None) {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        };
        self.close_cursor();
        self.close_connection();
        outcome
    }

    fn close_cursor(&mut self) {
        if self.cursor_id.is_some() {
            if let Err(err) = self.command("cursor/close", None) {
                tracing::warn!(error = %err, "cursor close failed");
            }
            self.cursor_id = None;
        }
    }

    fn close_connection(&mut self) {
        if self.connection_id.is_some() {
            if let Err(err) = self.command("connection/close", None) {
                tracing::warn!(error = %err, "connection close failed");
            }
            self.connection_id = None;
        }
    }

    // ------------------------------------------------------------------------
    // Operations inside an open session
    // ------------------------------------------------------------------------

    /// Insert records inside the open transaction.
    pub fn insert_into_table(
        &self,
        table: &str,
        records: &[Record],
        schema: Option<&str>,
    ) -> DatapubResult<Value> {
        let schema = self.client.config().schema_or_default(schema);
        let values: Vec<Value> = records
            .iter()
            .map(|record| Value::Object(record.clone()))
            .collect();
        let query = json!({"schema": schema, "table": table, "values": values});
        self.command("insert", Some(&query))
    }

    /// Select all rows: a search positions the cursor, a fetchall
    /// streams the rows, and the search's result description supplies
    /// the field names to rebuild records from the row arrays.
    pub fn select_from_table(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> DatapubResult<Vec<Record>> {
        let schema = self.client.config().schema_or_default(schema);
        let query = json!({"schema": schema, "table": table});
        let search = self.command("search", Some(&query))?;
        let field_names = result_field_names(&search)?;

        let response = self.command("cursor/fetchall", None)?;
        let rows = response
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let cells = row.as_array().cloned().unwrap_or_default();
            records.push(field_names.iter().cloned().zip(cells).collect());
        }
        Ok(records)
    }

    /// Delete all rows of the table inside the open transaction.
    pub fn delete_from_table(&self, table: &str, schema: Option<&str>) -> DatapubResult<Value> {
        let schema = self.client.config().schema_or_default(schema);
        let query = json!({"schema": schema, "table": table});
        self.command("delete", Some(&query))
    }

    /// Count rows with a server-side aggregate: one search for the
    /// count, one fetch for the single result row.
    pub fn count_rows(&self, table: &str, schema: Option<&str>) -> DatapubResult<u64> {
        let schema = self.client.config().schema_or_default(schema);
        let search = self.command("search", Some(&count_query(schema, table)))?;
        let field_names = result_field_names(&search)?;

        let response = self.command("cursor/fetch_one", None)?;
        let cells = response
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let record: Record = field_names.into_iter().zip(cells).collect();
        record
            .get("rowcount")
            .and_then(Value::as_u64)
            .ok_or_else(|| DatapubError::ClientSide("aggregate result has no rowcount".to_string()))
    }
}

fn session_id(response: &Value, key: &str) -> DatapubResult<Value> {
    response
        .get("content")
        .and_then(|content| content.get(key))
        .cloned()
        .ok_or_else(|| DatapubError::ClientSide(format!("advanced response has no {key}")))
}

/// Field names from a search response's result description. Each
/// description entry is an array whose first element is the name.
fn result_field_names(response: &Value) -> DatapubResult<Vec<String>> {
    let description = response
        .get("content")
        .and_then(|content| content.get("description"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            DatapubError::ClientSide("search response has no result description".to_string())
        })?;
    Ok(description
        .iter()
        .map(|field| {
            field
                .get(0)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect())
}

fn count_query(schema: &str, table: &str) -> Value {
    json!({
        "type": "select",
        "from": [{"type": "table", "schema": schema, "table": table}],
        "fields": [{
            "type": "label",
            "element": {
                "type": "function",
                "function": "count",
                "operands": {
                    "type": "grouping",
                    "grouping": [{"type": "column", "column": "*", "is_literal": true}]
                }
            },
            "label": "rowcount"
        }]
    })
}
