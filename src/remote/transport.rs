//! HTTP transport for GraphQL requests against a remote catalog.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// A single failed exchange with the remote, before any retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("response was not valid JSON: {0}")]
    Decode(String),
}

impl TransportError {
    /// 429, 5xx and connection failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            TransportError::Connection(_) => true,
            TransportError::Decode(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Sends one GraphQL request body and returns the decoded JSON response.
pub trait CatalogTransport: Send + Sync {
    fn execute(&self, url: &str, api_key: &str, body: &Value) -> Result<Value, TransportError>;
}

/// Blocking reqwest implementation of [`CatalogTransport`].
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(concat!("catalog-gaps/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

impl CatalogTransport for HttpTransport {
    fn execute(&self, url: &str, api_key: &str, body: &Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(url)
            .header("ApiKey", api_key)
            .json(body)
            .send()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let message = response
                .text()
                .ok()
                .filter(|t| !t.trim().is_empty())
                .map(|t| t.chars().take(200).collect())
                .unwrap_or_else(|| status.to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}
