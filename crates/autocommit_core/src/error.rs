//! Error types for the core crate.

use autocommit_driver::DriverError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine, connection, and session operations.
///
/// Invariant violations of the autocommit coordinator are not represented
/// here: they panic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Driver error.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// A required collaborator was never configured.
    #[error("{what} is not configured")]
    NotConfigured {
        /// What is missing.
        what: String,
    },

    /// No driver is registered for the URL scheme.
    #[error("no driver registered for scheme {scheme:?}")]
    UnsupportedScheme {
        /// The URL scheme.
        scheme: String,
    },

    /// The session has no bind to acquire a connection from.
    #[error("session is not bound to an engine or connection")]
    UnboundSession,

    /// `begin` was called while a transaction is already open.
    #[error("a transaction is already begun on this session")]
    TransactionAlreadyBegun,

    /// `begin_nested` was called with no enclosing transaction.
    #[error("cannot start a savepoint when no transaction is in progress")]
    NoTransactionForSavepoint,

    /// The connection-level transaction has already finished.
    #[error("transaction {id} is no longer active")]
    TransactionInactive {
        /// The transaction ID, as displayed.
        id: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-configured error.
    pub fn not_configured(what: impl Into<String>) -> Self {
        Self::NotConfigured { what: what.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error wraps a closed driver connection.
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::Driver(err) if err.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_configured_names_the_collaborator() {
        let err = CoreError::not_configured("engine");
        assert_eq!(err.to_string(), "engine is not configured");
    }

    #[test]
    fn driver_errors_convert() {
        let err: CoreError = DriverError::Closed.into();
        assert!(err.is_connection_closed());
        assert!(!CoreError::UnboundSession.is_connection_closed());
    }
}
