//! Error types for SmartStore operations
//!
//! All SmartStore errors are represented by the StoreError enum. Errors are
//! `Clone` so a single in-flight open/flush/close result can be handed to
//! every caller that joined it.

use std::path::PathBuf;

use thiserror::Error;

/// SmartStore error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A mandatory option is missing or an option value is out of range
    #[error("Invalid option \"{option}\": {reason}")]
    Configuration {
        /// Name of the offending option
        option: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Attempt to assign or delete one of the store's method names
    #[error("Attempt to overwrite reserved property \"{name}\" of the store")]
    ReservedProperty {
        /// The reserved name
        name: String,
    },

    /// Key access before the store finished opening (or after it started closing)
    #[error(
        "Trying to access key \"{key}\" on a store that is not open yet. \
         Forgot to call open() or didn't wait for it to be done?"
    )]
    NotOpen {
        /// The key that was accessed
        key: String,
    },

    /// Persisted content could not be decoded
    #[error("Protocol error: {reason}")]
    Protocol {
        /// Description of the malformed content
        reason: String,
    },

    /// I/O operation failed
    #[error("{}", display_io(.path, .kind, .message))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Sync and async variants of the same operation were mixed
    #[error("{reason}")]
    Misuse {
        /// Which calls collided
        reason: String,
    },

    /// A background open/flush/close task panicked or was cancelled
    #[error("Background {operation} did not complete: {reason}")]
    Interrupted {
        /// The lifecycle operation that was running
        operation: &'static str,
        /// Join failure description
        reason: String,
    },
}

fn display_io(path: &Option<PathBuf>, kind: &std::io::ErrorKind, message: &str) -> String {
    match path {
        Some(path) => format!("I/O error in {}: {} ({})", path.display(), message, kind),
        None => format!("I/O error: {} ({})", message, kind),
    }
}

impl StoreError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        StoreError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        StoreError::Protocol { reason: reason.into() }
    }

    pub(crate) fn misuse(reason: impl Into<String>) -> Self {
        StoreError::Misuse { reason: reason.into() }
    }

    /// True for the "file does not exist" signal of the file API.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Io { kind: std::io::ErrorKind::NotFound, .. })
    }
}

/// Convert std::io::Error to StoreError::Io
impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Malformed structured text is a protocol failure
impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Protocol { reason: err.to_string() }
    }
}

/// Result type alias for SmartStore operations
pub type StoreResult<T> = Result<T, StoreError>;
