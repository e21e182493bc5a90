//! Engines, connections, and connection-level transactions.

use crate::config::{EngineOptions, IsolationLevel};
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use autocommit_driver::{
    ConnectionId, DatabaseUrl, Driver, DriverConnection, DriverParams, HasAutocommitFlag, Write,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// What an engine knows about the database it talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    name: String,
    isolation_level: IsolationLevel,
}

impl Dialect {
    /// Returns the dialect name (the URL scheme).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the isolation level new connections are opened with.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }
}

/// A connection source for one database URL.
///
/// Engines do not pool: every [`Engine::connect`] opens a fresh driver
/// connection.
#[derive(Debug)]
pub struct Engine {
    url: DatabaseUrl,
    driver: Arc<dyn Driver>,
    dialect: Dialect,
    driver_params: DriverParams,
}

impl Engine {
    /// Creates an engine. No connection is opened until [`Engine::connect`].
    pub fn new(url: DatabaseUrl, driver: Arc<dyn Driver>, options: EngineOptions) -> Self {
        let dialect = Dialect {
            name: url.scheme().to_string(),
            isolation_level: options.isolation_level,
        };
        Self {
            url,
            driver,
            dialect,
            driver_params: options.driver_params,
        }
    }

    /// Returns the database URL.
    #[must_use]
    pub fn url(&self) -> &DatabaseUrl {
        &self.url
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Opens a new connection with the engine's isolation level applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot connect.
    pub fn connect(&self) -> CoreResult<Connection> {
        let raw = self.driver.connect(&self.url, &self.driver_params)?;
        raw.set_autocommit(self.dialect.isolation_level.is_autocommit())?;
        tracing::debug!(
            connection = %raw.connection_id(),
            driver = self.driver.name(),
            isolation_level = %self.dialect.isolation_level,
            "connected"
        );
        Ok(Connection::new(raw))
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    /// The open root transaction, if any.
    root: Option<TransactionId>,
    savepoint_seq: u32,
}

#[derive(Debug)]
struct ConnectionInner {
    raw: Arc<dyn DriverConnection>,
    state: Mutex<ConnectionState>,
}

/// A shared handle to one driver connection.
///
/// Cloning is cheap and every clone refers to the same physical connection.
/// Statements run in whatever driver transaction is open; [`Connection::begin`]
/// and [`Connection::begin_nested`] delimit transactions explicitly.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wraps a driver connection.
    pub fn new(raw: Arc<dyn DriverConnection>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                raw,
                state: Mutex::new(ConnectionState::default()),
            }),
        }
    }

    /// Returns the driver connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.raw.connection_id()
    }

    /// Returns the driver connection.
    #[must_use]
    pub fn raw(&self) -> &Arc<dyn DriverConnection> {
        &self.inner.raw
    }

    /// Returns the raw autocommit flag holder of the driver connection.
    #[must_use]
    pub fn dbapi_connection(&self) -> Arc<dyn HasAutocommitFlag> {
        Arc::clone(&self.inner.raw).autocommit_flag()
    }

    /// Returns true if both handles refer to the same connection.
    #[must_use]
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns true while a root transaction is open on this connection.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.inner.state.lock().root.is_some()
    }

    /// Begins a transaction.
    ///
    /// If a root transaction is already open, the returned transaction is a
    /// marker whose commit and rollback leave the root alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub fn begin(&self) -> CoreResult<ConnectionTransaction> {
        if self.is_closed() {
            return Err(autocommit_driver::DriverError::Closed.into());
        }

        let id = TransactionId::generate();
        let mut state = self.inner.state.lock();
        let kind = if state.root.is_some() {
            TransactionKind::Marker
        } else {
            state.root = Some(id);
            TransactionKind::Root
        };
        Ok(ConnectionTransaction {
            id,
            kind,
            connection: self.clone(),
            finished: false,
        })
    }

    /// Begins a savepoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver rejects the savepoint, which happens
    /// when the connection is in autocommit mode.
    pub fn begin_nested(&self) -> CoreResult<ConnectionTransaction> {
        let name = {
            let mut state = self.inner.state.lock();
            state.savepoint_seq += 1;
            format!("sa_savepoint_{}", state.savepoint_seq)
        };
        self.inner.raw.savepoint(&name)?;
        Ok(ConnectionTransaction {
            id: TransactionId::generate(),
            kind: TransactionKind::Savepoint(name),
            connection: self.clone(),
            finished: false,
        })
    }

    /// Executes a write.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails.
    pub fn execute(&self, write: &Write) -> CoreResult<()> {
        Ok(self.inner.raw.execute(write)?)
    }

    /// Reads a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails.
    pub fn get(&self, table: &str, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.inner.raw.get(table, key)?)
    }

    /// Closes the driver connection. Any open transaction is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to close.
    pub fn close(&self) -> CoreResult<()> {
        self.inner.state.lock().root = None;
        Ok(self.inner.raw.close()?)
    }

    /// Returns true if the driver connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.raw.is_closed()
    }

    fn finish_root(&self, id: TransactionId) -> CoreResult<()> {
        let mut state = self.inner.state.lock();
        if state.root != Some(id) {
            return Err(CoreError::TransactionInactive { id: id.to_string() });
        }
        state.root = None;
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TransactionKind {
    Root,
    Savepoint(String),
    Marker,
}

/// A transaction opened directly on a [`Connection`].
///
/// Commit and rollback consume the transaction. Dropping an unfinished root
/// rolls it back; dropping a savepoint or marker leaves the driver state to
/// the enclosing root.
#[derive(Debug)]
#[must_use = "a connection transaction must be committed or rolled back"]
pub struct ConnectionTransaction {
    id: TransactionId,
    kind: TransactionKind,
    connection: Connection,
    finished: bool,
}

impl ConnectionTransaction {
    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns true for a savepoint.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        matches!(self.kind, TransactionKind::Savepoint(_))
    }

    /// Returns true for a marker inside an already open root transaction.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        self.kind == TransactionKind::Marker
    }

    /// Returns the connection this transaction runs on.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Commits the transaction.
    ///
    /// A root commit commits the driver transaction; a savepoint is released;
    /// a marker does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails or the root was already ended by
    /// closing the connection.
    pub fn commit(mut self) -> CoreResult<()> {
        self.finished = true;
        let raw = self.connection.raw();
        match &self.kind {
            TransactionKind::Root => {
                self.connection.finish_root(self.id)?;
                raw.commit()?;
            }
            TransactionKind::Savepoint(name) => raw.release_savepoint(name)?,
            TransactionKind::Marker => {}
        }
        Ok(())
    }

    /// Rolls back the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails or the root was already ended by
    /// closing the connection.
    pub fn rollback(mut self) -> CoreResult<()> {
        self.finished = true;
        let raw = self.connection.raw();
        match &self.kind {
            TransactionKind::Root => {
                self.connection.finish_root(self.id)?;
                raw.rollback()?;
            }
            TransactionKind::Savepoint(name) => {
                raw.rollback_to_savepoint(name)?;
                raw.release_savepoint(name)?;
            }
            TransactionKind::Marker => {}
        }
        Ok(())
    }
}

impl Drop for ConnectionTransaction {
    fn drop(&mut self) {
        if self.finished || self.kind != TransactionKind::Root {
            return;
        }
        // Closing the connection already ended the root.
        if self.connection.finish_root(self.id).is_err() {
            return;
        }
        if let Err(err) = self.connection.raw().rollback() {
            tracing::warn!(
                transaction = %self.id,
                connection = %self.connection.id(),
                error = %err,
                "failed to roll back dropped transaction"
            );
        }
    }
}

/// Where a session acquires its connections from.
#[derive(Debug, Clone)]
pub enum Bind {
    /// Open a fresh connection per root transaction.
    Engine(Arc<Engine>),
    /// Reuse one shared connection.
    Connection(Connection),
}

impl Bind {
    /// Returns the bound connection, if bound to one.
    #[must_use]
    pub fn as_connection(&self) -> Option<&Connection> {
        match self {
            Self::Connection(conn) => Some(conn),
            Self::Engine(_) => None,
        }
    }
}

impl From<Arc<Engine>> for Bind {
    fn from(engine: Arc<Engine>) -> Self {
        Self::Engine(engine)
    }
}

impl From<Connection> for Bind {
    fn from(connection: Connection) -> Self {
        Self::Connection(connection)
    }
}

impl From<&Connection> for Bind {
    fn from(connection: &Connection) -> Self {
        Self::Connection(connection.clone())
    }
}
