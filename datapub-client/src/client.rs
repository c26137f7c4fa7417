//! Platform client: table administration, row access, and metadata.

use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};

use datapub_core::{
    classify_response, records_from_value, ClientConfig, DatapubError, DatapubResult, Record,
    TableDefinition, TableReference,
};

use crate::transport::{ApiResponse, HttpTransport, Transport};

/// Schemas never reported by [`DatapubClient::list_tables`].
const HIDDEN_SCHEMAS: &[&str] = &["topology", "test", "sandbox", "information_schema"];

/// Client for the platform's HTTP API.
///
/// Holds an immutable [`ClientConfig`] and a transport; all operations
/// are synchronous and sequential. Construct once, then call operations
/// as needed:
///
/// ```no_run
/// use datapub_client::DatapubClient;
/// use datapub_core::ClientConfig;
///
/// # fn main() -> datapub_core::DatapubResult<()> {
/// let client = DatapubClient::new(ClientConfig::with_token("xxxx"))?;
/// let definition = client.get_table_definition("wind_parks", None)?;
/// println!("{} columns", definition.columns.len());
/// # Ok(())
/// # }
/// ```
pub struct DatapubClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl DatapubClient {
    /// Build a client talking HTTP according to `config`.
    pub fn new(config: ClientConfig) -> DatapubResult<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(DatapubClient { config, transport })
    }

    /// Build a client over a caller-supplied transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> DatapubResult<Self> {
        config.validate()?;
        Ok(DatapubClient { config, transport })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Browser URL of a table's data view.
    pub fn web_url(&self, table: &str, schema: Option<&str>) -> String {
        self.config
            .web_url(self.config.schema_or_default(schema), table)
    }

    // ------------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------------

    /// Send one request and check the status against the endpoint's
    /// expected one. Any other status, 2xx included, is classified into
    /// the error taxonomy from the response message.
    pub(crate) fn request(
        &self,
        method: Method,
        url: &str,
        expected_status: u16,
        body: Option<&Value>,
    ) -> DatapubResult<Value> {
        let method_name = method.as_str().to_string();
        let response = self.transport.send(method, url, body)?;
        tracing::debug!(status = response.status, method = %method_name, url = %url, "platform response");
        if response.status != expected_status {
            return Err(classify_response(
                response.status,
                &response_message(&response),
            ));
        }
        Ok(response.body)
    }

    pub(crate) fn table_api_url(&self, table: &str, schema: Option<&str>) -> String {
        format!(
            "{}schema/{}/tables/{}/",
            self.config.api_url(),
            self.config.schema_or_default(schema),
            table
        )
    }

    // ------------------------------------------------------------------------
    // Table administration
    // ------------------------------------------------------------------------

    /// Create a table from a (possibly loosely-specified) definition and
    /// return the definition as confirmed by the platform.
    pub fn create_table(
        &self,
        table: &str,
        definition: &Value,
        schema: Option<&str>,
    ) -> DatapubResult<TableDefinition> {
        let definition = datapub_core::normalize_table_definition(definition)?;
        let url = self.table_api_url(table, schema);
        tracing::info!(url = %url, "creating table");
        let body = json!({ "query": definition });
        self.request(Method::PUT, &url, 201, Some(&body))?;
        self.get_table_definition(table, schema)
    }

    pub fn drop_table(&self, table: &str, schema: Option<&str>) -> DatapubResult<()> {
        let url = self.table_api_url(table, schema);
        tracing::info!(url = %url, "dropping table");
        self.request(Method::DELETE, &url, 200, None)?;
        Ok(())
    }

    /// Fetch and reconstruct the table's definition: columns in ordinal
    /// order with primary and foreign key flags attached.
    pub fn get_table_definition(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> DatapubResult<TableDefinition> {
        let url = self.table_api_url(table, schema);
        let response = self.request(Method::GET, &url, 200, None)?;
        TableDefinition::from_response(&response)
    }

    /// Whether the table exists. Only the not-found case becomes
    /// `false`; every other error propagates.
    pub fn table_exists(&self, table: &str, schema: Option<&str>) -> DatapubResult<bool> {
        match self.get_table_definition(table, schema) {
            Ok(_) => Ok(true),
            Err(DatapubError::TableNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Relocate a table into another schema.
    pub fn move_table(
        &self,
        table: &str,
        target_schema: &str,
        schema: Option<&str>,
    ) -> DatapubResult<()> {
        let url = format!("{}move/{}/", self.table_api_url(table, schema), target_schema);
        self.request(Method::POST, &url, 200, None)?;
        Ok(())
    }

    /// List visible tables across all schemas. Schemas starting with an
    /// underscore and the platform's internal schemas are skipped.
    pub fn list_tables(&self) -> DatapubResult<Vec<TableReference>> {
        let advanced_url = format!("{}advanced/", self.config.api_url());
        let response = self.request(
            Method::POST,
            &format!("{advanced_url}get_schema_names"),
            200,
            None,
        )?;
        let schemas = content_strings(&response)?;

        let mut tables = Vec::new();
        for schema in schemas {
            if schema.starts_with('_') || HIDDEN_SCHEMAS.contains(&schema.as_str()) {
                continue;
            }
            let body = json!({"query": {"schema": schema}});
            let response = self.request(
                Method::POST,
                &format!("{advanced_url}get_table_names"),
                200,
                Some(&body),
            )?;
            for table in content_strings(&response)? {
                tables.push(TableReference {
                    schema: schema.clone(),
                    table,
                });
            }
        }
        Ok(tables)
    }

    // ------------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------------

    /// Select all rows, optionally filtered. Each filter is a predicate
    /// expression like `id>10` and is passed to the platform verbatim as
    /// a repeated `where` query parameter.
    pub fn select_from_table(
        &self,
        table: &str,
        schema: Option<&str>,
        where_filters: &[String],
    ) -> DatapubResult<Vec<Record>> {
        let mut url = format!("{}rows/", self.table_api_url(table, schema));
        if !where_filters.is_empty() {
            let filters: Vec<String> = where_filters.iter().map(|w| format!("where={w}")).collect();
            url = format!("{}?{}", url, filters.join("&"));
        }
        let response = self.request(Method::GET, &url, 200, None)?;
        records_from_value(response)
    }

    /// Delete all rows without dropping the table. Runs in its own
    /// advanced session so the deletion is committed atomically.
    pub fn delete_from_table(&self, table: &str, schema: Option<&str>) -> DatapubResult<()> {
        self.with_advanced_session(|session| {
            session.delete_from_table(table, schema)?;
            Ok(())
        })
    }

    /// Server-confirmed row count via an aggregate query.
    pub fn count_rows(&self, table: &str, schema: Option<&str>) -> DatapubResult<u64> {
        self.with_advanced_session(|session| session.count_rows(table, schema))
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Read the table's metadata document.
    pub fn get_metadata(&self, table: &str, schema: Option<&str>) -> DatapubResult<Value> {
        if !self.table_exists(table, schema)? {
            return Err(DatapubError::TableNotFound(table.to_string()));
        }
        let url = format!("{}meta/", self.table_api_url(table, schema));
        self.request(Method::GET, &url, 200, None)
    }

    /// Write a metadata document, then read back what the platform
    /// accepted. A document without an `id` gets the table name as id.
    pub fn set_metadata(
        &self,
        table: &str,
        metadata: &Value,
        schema: Option<&str>,
    ) -> DatapubResult<Value> {
        if !self.table_exists(table, schema)? {
            return Err(DatapubError::TableNotFound(table.to_string()));
        }
        let metadata = ensure_metadata_id(table, metadata)?;
        let url = format!("{}meta/", self.table_api_url(table, schema));
        self.request(Method::POST, &url, 200, Some(&metadata))?;
        self.get_metadata(table, schema)
    }
}

/// Flatten a response body into the message string used for error
/// classification. A `reason` field takes precedence when present.
fn response_message(response: &ApiResponse) -> String {
    let body = match response.body.get("reason") {
        Some(reason) => reason,
        None => &response.body,
    };
    match body {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn content_strings(response: &Value) -> DatapubResult<Vec<String>> {
    let items = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            DatapubError::ClientSide("advanced response has no content list".to_string())
        })?;
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

fn ensure_metadata_id(table: &str, metadata: &Value) -> DatapubResult<Value> {
    let mut object = metadata.as_object().cloned().ok_or_else(|| {
        DatapubError::ClientSide("metadata must be a JSON object".to_string())
    })?;
    if !object.contains_key("id") {
        object.insert("id".to_string(), Value::String(table.to_string()));
    }
    Ok(Value::Object(object))
}
