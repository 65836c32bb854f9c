//! Error taxonomy for missing-entry scans.
//!
//! Each failure class maps to a distinct recovery policy:
//!
//! - [`RemoteServiceError`]: retryable failures are absorbed by the remote
//!   client's backoff loop; once exhausted the engine hands back a cursor
//!   pointing at the failed page. Non-retryable failures abort the call.
//! - [`CacheBuildError`]: the local inventory could not be scanned. Fatal for
//!   the call, raised before any remote request.
//! - [`ConfigurationError`]: surfaced verbatim, never retried.
//! - [`InvalidCursorError`]: only reported when decoding a token on request.
//!   Scans treat a bad cursor as absent and restart.

use thiserror::Error;

use crate::model::SubjectType;

/// Failure talking to the remote catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote catalog request failed{}: {message}", status_suffix(.status))]
pub struct RemoteServiceError {
    /// Whether the same request may succeed if attempted again later.
    pub retryable: bool,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteServiceError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            status: None,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Failure reading the local inventory.
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("inventory database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create inventory directory: {0}")]
    CreateDir(#[from] std::io::Error),

    #[error("inventory unavailable: {0}")]
    Unavailable(String),
}

/// The local identifier set for an endpoint could not be built.
#[derive(Error, Debug)]
#[error("failed to build local identifier cache for {endpoint}: {source}")]
pub struct CacheBuildError {
    pub endpoint: String,
    #[source]
    pub source: InventoryError,
}

/// Misconfiguration that no amount of retrying will fix.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("no remote source is configured")]
    NoRemoteSource,

    #[error("remote source {0:?} is not configured")]
    UnknownEndpoint(String),

    #[error("remote source {endpoint:?} has no API key (set api_key or {env_var})")]
    MissingApiKey { endpoint: String, env_var: String },

    #[error("{subject_type} {local_id} is not linked to remote source {endpoint:?}")]
    SubjectUnlinked {
        subject_type: SubjectType,
        local_id: String,
        endpoint: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A cursor token that could not be decoded.
#[derive(Error, Debug)]
#[error("invalid cursor: {0}")]
pub struct InvalidCursorError(pub String);

/// Umbrella error for a single scan call.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Remote(#[from] RemoteServiceError),

    #[error(transparent)]
    CacheBuild(#[from] CacheBuildError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_includes_status() {
        let err = RemoteServiceError::retryable("service unavailable").with_status(503);
        let msg = err.to_string();
        assert!(msg.contains("HTTP 503"));
        assert!(msg.contains("service unavailable"));
        assert!(err.retryable);
    }

    #[test]
    fn test_remote_error_display_without_status() {
        let err = RemoteServiceError::fatal("bad schema");
        assert_eq!(err.to_string(), "remote catalog request failed: bad schema");
        assert!(!err.retryable);
    }

    #[test]
    fn test_subject_unlinked_display() {
        let err = ConfigurationError::SubjectUnlinked {
            subject_type: SubjectType::Person,
            local_id: "42".into(),
            endpoint: "primary".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("person 42"));
        assert!(msg.contains("\"primary\""));
    }

    #[test]
    fn test_scan_error_is_transparent() {
        let err: ScanError = ConfigurationError::NoRemoteSource.into();
        assert_eq!(err.to_string(), "no remote source is configured");
    }
}
