//! Driver connection traits.

use crate::error::DriverResult;
use crate::url::DatabaseUrl;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identifier for a physical driver connection.
///
/// Connection IDs are assigned by the driver and never reused by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Creates a new connection ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// A single row-level write sent to a driver.
///
/// Rows are opaque: a table name, a key, and a byte payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Insert or replace a row.
    Put {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
        /// Row payload.
        value: Vec<u8>,
    },
    /// Delete a row.
    Delete {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
    },
}

impl Write {
    /// Creates a put write.
    pub fn put(table: impl Into<String>, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            table: table.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a delete write.
    pub fn delete(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Delete {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Returns the `(table, key)` this write targets.
    #[must_use]
    pub fn target(&self) -> (&str, &str) {
        match self {
            Self::Put { table, key, .. } | Self::Delete { table, key } => (table, key),
        }
    }
}

/// Driver-specific connection parameters, passed through untouched.
pub type DriverParams = BTreeMap<String, String>;

/// The autocommit capability of a live driver connection.
///
/// This is the only part of a driver the autocommit coordinator depends on.
///
/// # Invariants
///
/// - `set_autocommit` fails with [`crate::DriverError::Closed`] once the
///   connection is closed
/// - `autocommit` keeps reporting the last value after close
pub trait HasAutocommitFlag: Send + Sync + fmt::Debug {
    /// Returns the driver-assigned connection ID.
    fn connection_id(&self) -> ConnectionId;

    /// Returns the current autocommit flag.
    fn autocommit(&self) -> bool;

    /// Sets the autocommit flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or a driver transaction
    /// is currently open.
    fn set_autocommit(&self, enabled: bool) -> DriverResult<()>;

    /// Returns true if the connection has been closed.
    fn is_closed(&self) -> bool;
}

/// A live driver connection.
///
/// Follows DB-API semantics: with autocommit disabled, the first statement
/// implicitly opens a driver transaction that stays open until `commit` or
/// `rollback`.
pub trait DriverConnection: HasAutocommitFlag {
    /// Executes a single write.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn execute(&self, write: &Write) -> DriverResult<()>;

    /// Reads a row as seen by this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn get(&self, table: &str, key: &str) -> DriverResult<Option<Vec<u8>>>;

    /// Commits the open driver transaction, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn commit(&self) -> DriverResult<()>;

    /// Rolls back the open driver transaction, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn rollback(&self) -> DriverResult<()>;

    /// Establishes a savepoint.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction block can be open (autocommit on).
    fn savepoint(&self, name: &str) -> DriverResult<()>;

    /// Releases a savepoint and every savepoint established after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the savepoint does not exist.
    fn release_savepoint(&self, name: &str) -> DriverResult<()>;

    /// Rolls back to a savepoint, keeping the savepoint itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the savepoint does not exist.
    fn rollback_to_savepoint(&self, name: &str) -> DriverResult<()>;

    /// Returns true if a driver transaction is open.
    fn in_transaction(&self) -> bool;

    /// Closes the connection, discarding any open driver transaction.
    ///
    /// # Errors
    ///
    /// Closing twice is not an error.
    fn close(&self) -> DriverResult<()>;

    /// Returns the raw autocommit flag holder behind this connection.
    fn autocommit_flag(self: Arc<Self>) -> Arc<dyn HasAutocommitFlag>;
}

/// A database driver that opens connections for a URL.
pub trait Driver: Send + Sync + fmt::Debug {
    /// Returns the driver name.
    fn name(&self) -> &str;

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot connect to `url`.
    fn connect(
        &self,
        url: &DatabaseUrl,
        params: &DriverParams,
    ) -> DriverResult<Arc<dyn DriverConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn:7");
    }

    #[test]
    fn write_target() {
        let put = Write::put("users", "1", b"alice".to_vec());
        assert_eq!(put.target(), ("users", "1"));

        let delete = Write::delete("users", "2");
        assert_eq!(delete.target(), ("users", "2"));
    }
}
