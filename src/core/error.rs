//! Error types and handling for the Tandem session host
//!
//! Wraps the document core's errors together with configuration, storage
//! and session failures seen by a host process.

use thiserror::Error;
use tandem_core::CoreError;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the session host
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document core errors
    #[error("Document error: {0}")]
    Core(#[from] CoreError),

    /// Session store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Session lifecycle errors
    #[error("Session error: {0}")]
    Session(String),

    /// Authentication and permission errors
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal system errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Session store errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Stored snapshot could not be decoded
    #[error("Corrupted snapshot for session {session}: {reason}")]
    Corruption {
        /// Affected session
        session: String,
        /// Decoder message
        reason: String,
    },

    /// Backend refused the write
    #[error("Write failed for session {0}")]
    WriteFailed(String),

    /// Backend I/O failure
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a session error
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Create a permission error
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(StorageError::Io(_)) | Error::Io(_))
            || matches!(self, Error::Core(e) if e.is_conflict())
    }

    /// Check if this is a client error (4xx equivalent)
    pub fn is_client_error(&self) -> bool {
        match self {
            Error::InvalidInput(_) | Error::Permission(_) | Error::NotFound(_) => true,
            Error::Core(e) => matches!(
                e,
                CoreError::Protocol(_)
                    | CoreError::Schema(_)
                    | CoreError::InvalidInput(_)
                    | CoreError::NotFound(_)
                    | CoreError::Decode(_)
            ),
            _ => false,
        }
    }

    /// Check if this is a server error (5xx equivalent)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Internal(_) | Error::Storage(_) | Error::Io(_) | Error::Metrics(_))
    }
}
