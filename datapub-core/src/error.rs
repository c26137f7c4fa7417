//! Error types for DataPub operations

use thiserror::Error;

/// Errors surfaced by DataPub client operations.
///
/// The platform reports its refined failures (bad token, missing table,
/// duplicate table) through generic HTTP errors whose only distinguishing
/// feature is the response message. [`classify_response`] recovers the
/// refined variants from that message in one place so the rest of the
/// client never inspects raw responses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatapubError {
    /// The platform rejected the API token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The platform failed with a 5xx status, or a bulk insert exhausted
    /// its retries.
    #[error("server-side error: {0}")]
    ServerSide(String),

    /// A 4xx status, a response with an unexpected status code, or a
    /// local validation failure (unknown columns, malformed records).
    #[error("client-side error: {0}")]
    ClientSide(String),

    /// Create was issued for a table that already exists.
    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    /// The table does not exist. The platform reports this as
    /// "do not have permission", which is folded in here.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The request produced no status code at all: connect failure,
    /// timeout, or an unreadable response body.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for DataPub operations.
pub type DatapubResult<T> = Result<T, DatapubError>;

impl DatapubError {
    /// True for the error class the bulk insert pipeline may retry.
    pub fn is_server_side(&self) -> bool {
        matches!(self, DatapubError::ServerSide(_))
    }

    /// True for errors caused by the request rather than the platform.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            DatapubError::ClientSide(_)
                | DatapubError::Authentication(_)
                | DatapubError::TableAlreadyExists(_)
                | DatapubError::TableNotFound(_)
        )
    }
}

/// Message fragments the platform buries its refined errors under.
/// Matched case-insensitively, first hit wins. "do not have permission"
/// is the platform's (misleading) answer for a missing table.
const MESSAGE_PATTERNS: &[(&str, fn(String) -> DatapubError)] = &[
    ("invalid token", DatapubError::Authentication),
    ("do not have permission", DatapubError::TableNotFound),
    ("not found", DatapubError::TableNotFound),
    ("exists", DatapubError::TableAlreadyExists),
];

/// Classify a failed platform response into the error taxonomy.
///
/// Pure function, evaluated once per failed request at the transport
/// boundary: 5xx is always [`DatapubError::ServerSide`]; everything else
/// is refined by substring match on the server message and falls back to
/// [`DatapubError::ClientSide`]. Responses whose status merely differs
/// from the endpoint's expected status (even 2xx) pass through here too.
pub fn classify_response(status: u16, message: &str) -> DatapubError {
    if status >= 500 {
        return DatapubError::ServerSide(message.to_string());
    }
    let lowered = message.to_lowercase();
    for (pattern, variant) in MESSAGE_PATTERNS {
        if lowered.contains(pattern) {
            return variant(message.to_string());
        }
    }
    DatapubError::ClientSide(message.to_string())
}
