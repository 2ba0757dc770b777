//! Error types for repositories and units of work.

use crate::Capability;
use thiserror::Error;

/// Errors raised by repositories, sessions and units of work.
///
/// A lookup that finds nothing is not an error; it yields `None`.
#[derive(Error, Debug)]
pub enum DataError {
    /// The connection string was empty or did not name a known database.
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// A caller-side precondition was violated.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A single-result lookup matched more than one row.
    #[error("Expected at most one {entity}, found {count}")]
    Ambiguous {
        /// Entity type name.
        entity: &'static str,
        /// Number of matching rows.
        count: usize,
    },

    /// A staged insert collided with an existing identity.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A staged update targeted a row that no longer exists.
    #[error("Missing row: {0}")]
    Missing(String),

    /// The backend lacks the capability the operation requires.
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(Capability),

    /// `begin_transaction` was called while a transaction was active.
    #[error("A transaction is already active")]
    TransactionActive,

    /// The caller's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// The unit of work or pool has been closed.
    #[error("Resource has been disposed")]
    Disposed,

    /// Backend storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for data operations.
pub type DataResult<T> = Result<T, DataError>;

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Serialization(err.to_string())
    }
}

impl From<DataError> for trestle_core::Error {
    fn from(err: DataError) -> Self {
        use trestle_core::Error;
        match err {
            DataError::Precondition(msg) => Error::BadRequest(msg),
            DataError::Ambiguous { .. } | DataError::Conflict(_) => Error::Conflict(err.to_string()),
            DataError::Missing(msg) => Error::NotFound(msg),
            DataError::Unsupported(_) => Error::NotImplemented(err.to_string()),
            DataError::Cancelled => Error::Cancelled(err.to_string()),
            DataError::InvalidConnection(_) => Error::ServiceUnavailable(err.to_string()),
            DataError::TransactionActive
            | DataError::Disposed
            | DataError::Storage(_)
            | DataError::Serialization(_) => Error::Internal(err.to_string()),
        }
    }
}
