//! Typed error hierarchy for dlqueue
//!
//! Per-file failures never escape the controller; they are converted into
//! state transitions. These errors surface from the façade, the stores and
//! the transport boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the download queue
#[derive(Debug, Error)]
pub enum QueueError {
    /// Network-related errors (connection, timeout, bad status, etc.)
    #[error("Network error: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// Storage/filesystem errors
    #[error("Storage error at {path:?}: {message}")]
    Storage {
        kind: StorageErrorKind,
        path: PathBuf,
        message: String,
    },

    /// Invalid input from the caller
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    /// File or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transfer was aborted through its job handle
    #[error("Transfer cancelled")]
    Cancelled,

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Queue snapshot could not be encoded or decoded
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Queue is shutting down
    #[error("Queue is shutting down")]
    Shutdown,

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Connection refused or could not be established
    ConnectionRefused,
    /// Connection reset mid-transfer
    ConnectionReset,
    /// Connection or read timeout
    Timeout,
    /// Server returned a non-success status
    HttpStatus(u16),
    /// Too many redirects
    TooManyRedirects,
    /// Other network error
    Other,
}

/// Storage error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// File/directory not found
    NotFound,
    /// Permission denied
    PermissionDenied,
    /// File already exists
    AlreadyExists,
    /// Invalid path
    InvalidPath,
    /// I/O error
    Io,
}

impl QueueError {
    /// Whether this error is the structured cancellation signal.
    ///
    /// The controller uses this to tell an aborted transfer apart from a
    /// genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Create a network error
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(
        kind: StorageErrorKind,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Storage {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }
}

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => StorageErrorKind::NotFound,
            ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            ErrorKind::AlreadyExists => StorageErrorKind::AlreadyExists,
            _ => StorageErrorKind::Io,
        };
        Self::Storage {
            kind,
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for QueueError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            NetworkErrorKind::Timeout
        } else if err.is_connect() {
            NetworkErrorKind::ConnectionRefused
        } else if err.is_redirect() {
            NetworkErrorKind::TooManyRedirects
        } else if let Some(status) = err.status() {
            NetworkErrorKind::HttpStatus(status.as_u16())
        } else {
            NetworkErrorKind::Other
        };

        Self::Network {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for QueueError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidInput {
            field: "source",
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "storage")]
impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_structured() {
        assert!(QueueError::Cancelled.is_cancelled());
        assert!(!QueueError::Shutdown.is_cancelled());
    }

    #[test]
    fn http_status_is_a_plain_failure() {
        let err = QueueError::network(NetworkErrorKind::HttpStatus(404), "HTTP error: 404");
        assert!(!err.is_cancelled());
        assert!(matches!(
            err,
            QueueError::Network {
                kind: NetworkErrorKind::HttpStatus(404),
                ..
            }
        ));
        assert_eq!(err.to_string(), "Network error: HTTP error: 404");
    }

    #[test]
    fn io_not_found_maps_to_storage_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        match QueueError::from(io) {
            QueueError::Storage { kind, .. } => assert_eq!(kind, StorageErrorKind::NotFound),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
