//! Error types for the bulk operation engine.
//!
//! Remote failures are a closed set of [`ErrorKind`]s carried by [`RemoteError`];
//! every transport call returns one of these instead of panicking or raising.
//! Run-level failures that stop a run are [`BulkError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Classified kind of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request or parameters (4xx other than the ones below).
    Validation,
    /// Missing or rejected credentials (401).
    Authentication,
    /// Caller lacks rights on the resource (403).
    Permission,
    /// Resource vanished between selection and mutation (404).
    NotFound,
    /// Concurrent modification detected (409).
    Conflict,
    /// Remote throttling (429).
    RateLimited,
    /// Remote server failure (5xx).
    Server,
    /// Connection or timeout failure before a response arrived.
    Network,
}

impl ErrorKind {
    /// Classify an HTTP status code. Returns `None` for non-error statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(ErrorKind::Authentication),
            403 => Some(ErrorKind::Permission),
            404 => Some(ErrorKind::NotFound),
            409 => Some(ErrorKind::Conflict),
            429 => Some(ErrorKind::RateLimited),
            400..=499 => Some(ErrorKind::Validation),
            500..=599 => Some(ErrorKind::Server),
            _ => None,
        }
    }

    /// Transient failures are the only ones eligible for retry.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Server | ErrorKind::Network
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Permission => "permission",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Server => "server",
            ErrorKind::Network => "network",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed outcome of a failed transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status when the failure came from a response.
    pub status: Option<u16>,
    /// Server-supplied retry hint (`Retry-After`).
    pub retry_after: Option<Duration>,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// Build an error from a non-success HTTP status. Statuses that do not
    /// classify as errors are reported as server failures.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = ErrorKind::from_status(status).unwrap_or(ErrorKind::Server);
        Self {
            kind,
            message: message.into(),
            status: Some(status),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Checkpoint storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Checkpoint I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Checkpoint at {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Checkpoint backend error: {0}")]
    Backend(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Run-level errors. These stop a run; per-item failures never become one.
#[derive(Debug, Error)]
pub enum BulkError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error(
        "Checkpoint signature mismatch: checkpoint was written for {found}, current invocation is {expected}"
    )]
    SignatureMismatch { expected: String, found: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("Operation not confirmed")]
    ConfirmationDeclined,
}

impl From<config::ConfigError> for BulkError {
    fn from(err: config::ConfigError) -> Self {
        BulkError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for BulkError {
    fn from(err: std::io::Error) -> Self {
        BulkError::Output(err.to_string())
    }
}
