//! History persistence error types

use thiserror::Error;

/// Errors raised while snapshotting or restoring series history
#[derive(Error, Debug)]
pub enum HistoryError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Background write task did not complete
    #[error("Write task failed: {0}")]
    Task(String),
}

impl From<serde_json::Error> for HistoryError {
    fn from(err: serde_json::Error) -> Self {
        HistoryError::Serialization(err.to_string())
    }
}

/// Result type alias for history operations
pub type HistoryResult<T> = Result<T, HistoryError>;
