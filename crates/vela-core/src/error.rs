//! Error types for the vela job queue.

use thiserror::Error;

/// Result type alias using vela's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vela operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A call to the external media service failed
    #[error("Request error: {0}")]
    Request(String),

    /// The download transport is gone; no further download can succeed.
    #[error("Download transport invalidated: {0}")]
    TransportInvalidated(String),

    /// Processing was stopped while the job was in flight
    #[error("Processing stopped")]
    Cancelled,

    /// Archive store rejected an operation
    #[error("Archive error: {0}")]
    Archive(String),

    /// Durable job snapshot could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the download failure class that aborts the whole job.
    pub fn is_fatal_transport(&self) -> bool {
        matches!(self, Error::TransportInvalidated(_))
    }

    /// True when the error came from a stop request rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
