//! Error types for driver operations.

use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors that can occur while talking to a driver connection.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// The autocommit flag cannot change while a driver transaction is open.
    #[error("cannot change autocommit inside an open transaction")]
    InTransaction,

    /// The operation needs a transaction block but none is open.
    #[error("{operation} can only be used in transaction blocks")]
    NoTransaction {
        /// The rejected operation.
        operation: &'static str,
    },

    /// Savepoint name is not known on this connection.
    #[error("savepoint {name} does not exist")]
    UnknownSavepoint {
        /// Name of the savepoint.
        name: String,
    },

    /// The database URL could not be parsed.
    #[error("invalid database URL {url:?}: {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// What is wrong with it.
        message: String,
    },
}

impl DriverError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error means the connection is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
