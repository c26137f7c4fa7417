//! Client configuration
//!
//! One immutable value built at startup and read by every operation.
//! There is no process-wide mutable state.

use std::env;

use crate::error::{DatapubError, DatapubResult};

pub const DEFAULT_PROTOCOL: &str = "https";
pub const DEFAULT_HOST: &str = "datapub.org";
pub const DEFAULT_API_VERSION: &str = "v0";
pub const DEFAULT_SCHEMA: &str = "model_draft";
pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_INSERT_RETRIES: u32 = 10;

/// Environment variable consulted when no token is configured.
pub const TOKEN_ENV_VAR: &str = "DATAPUB_API_TOKEN";

/// Connection settings for a platform client.
///
/// `batch_size` of 0 means one single batch for the whole upload.
/// `insert_retries` counts additional attempts after the first, so a
/// batch is tried at most `insert_retries + 1` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub protocol: String,
    pub host: String,
    pub api_version: String,
    pub token: Option<String>,
    pub default_schema: String,
    pub batch_size: usize,
    pub insert_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            protocol: DEFAULT_PROTOCOL.to_string(),
            host: DEFAULT_HOST.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            token: None,
            default_schema: DEFAULT_SCHEMA.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            insert_retries: DEFAULT_INSERT_RETRIES,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        ClientConfig {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> DatapubResult<()> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(DatapubError::ClientSide(format!(
                "protocol must be 'http' or 'https', got '{}'",
                self.protocol
            )));
        }
        if self.host.trim().is_empty() {
            return Err(DatapubError::ClientSide("host must not be empty".to_string()));
        }
        if self.api_version.trim().is_empty() {
            return Err(DatapubError::ClientSide(
                "api_version must not be empty".to_string(),
            ));
        }
        if self.default_schema.trim().is_empty() {
            return Err(DatapubError::ClientSide(
                "default_schema must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL of the HTTP API, with trailing slash.
    pub fn api_url(&self) -> String {
        format!(
            "{}://{}/api/{}/",
            self.protocol, self.host, self.api_version
        )
    }

    /// Browser URL of a table's data view on the platform.
    pub fn web_url(&self, schema: &str, table: &str) -> String {
        format!(
            "{}://{}/dataedit/view/{}/{}",
            self.protocol, self.host, schema, table
        )
    }

    /// The configured token, or the `DATAPUB_API_TOKEN` environment
    /// fallback when none was set.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| env::var(TOKEN_ENV_VAR).ok())
    }

    /// Pick the caller's schema when given, the configured default
    /// otherwise.
    pub fn schema_or_default<'a>(&'a self, schema: Option<&'a str>) -> &'a str {
        schema.unwrap_or(&self.default_schema)
    }
}
