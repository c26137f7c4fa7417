//! HTTP transport layer.
//!
//! One trait seam between the client and the network so that everything
//! above it can be exercised against a scripted transport in tests. The
//! real implementation is a thin wrapper over a blocking reqwest client.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

use datapub_core::{ClientConfig, DatapubError, DatapubResult};

/// Raw outcome of one HTTP round trip: the status code and the parsed
/// JSON body. A non-JSON body (some actions and most 5xx pages) comes
/// back as `Null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Performs one HTTP request. Implementations only move bytes; status
/// checking and error classification happen in the client on top.
pub trait Transport: Send + Sync {
    fn send(&self, method: Method, url: &str, body: Option<&Value>) -> DatapubResult<ApiResponse>;
}

/// Transport backed by a blocking reqwest client with the platform's
/// token auth header attached to every request.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> DatapubResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| DatapubError::Transport(e.to_string()))?;
        Ok(HttpTransport {
            client,
            headers: auth_headers(config)?,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, method: Method, url: &str, body: Option<&Value>) -> DatapubResult<ApiResponse> {
        let mut request = self
            .client
            .request(method, url)
            .headers(self.headers.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .map_err(|e| DatapubError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().unwrap_or(Value::Null);
        Ok(ApiResponse { status, body })
    }
}

fn auth_headers(config: &ClientConfig) -> DatapubResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(token) = config.resolve_token() {
        let value = HeaderValue::from_str(&format!("Token {token}")).map_err(|_| {
            DatapubError::ClientSide("API token contains invalid header characters".to_string())
        })?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}
