//! Sessions: units of work over a transaction stack.
//!
//! A session queues writes and sends them to its bind when flushed. It keeps
//! a stack of transactions; the top of the stack is the current transaction
//! and each entry's parent is the one below it.
//!
//! In autocommit mode (the default) a session holds no transaction between
//! calls. [`Session::commit`] with nothing open only flushes, because every
//! flushed statement is already durable.
//!
//! With `fake_root_transaction` enabled, the first `begin` synthesizes a root
//! transaction without touching the connection and opens a savepoint on top
//! of it. Application commits and rollbacks then only ever reach savepoints,
//! leaving whatever transaction the bound connection is already in (a test
//! fixture's) in charge of the outcome.

mod factory;
mod scoped;

pub use factory::SessionFactory;
pub use scoped::{ScopedSession, SharedSession};

use crate::config::{FakeRootDetection, SessionOptions};
use crate::engine::{Bind, Connection, ConnectionTransaction};
use crate::error::{CoreError, CoreResult};
use crate::events::SessionEvents;
use crate::types::{TransactionHandle, TransactionId};
use autocommit_driver::Write;
use std::fmt;
use std::sync::Arc;

pub(crate) type Listeners = Arc<[Arc<dyn SessionEvents>]>;

/// One entry of the session's transaction stack.
struct SessionTransaction {
    handle: TransactionHandle,
    connection: Connection,
    /// Whether the session opened `connection` and must close it.
    owns_connection: bool,
    /// `None` for a faked root.
    connection_txn: Option<ConnectionTransaction>,
}

/// A unit of work bound to an engine or a connection.
///
/// Sessions are created by a [`SessionFactory`] and inherit its options and
/// event listeners.
pub struct Session {
    options: SessionOptions,
    listeners: Listeners,
    transactions: Vec<SessionTransaction>,
    pending: Vec<Write>,
}

impl Session {
    pub(crate) fn new(options: SessionOptions, listeners: Listeners) -> Self {
        Self {
            options,
            listeners,
            transactions: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Returns the bind, if any.
    #[must_use]
    pub fn bind(&self) -> Option<&Bind> {
        self.options.bind.as_ref()
    }

    /// Returns true if the session runs in autocommit mode.
    #[must_use]
    pub fn autocommit(&self) -> bool {
        self.options.autocommit
    }

    /// Returns true if reads flush pending writes first.
    #[must_use]
    pub fn autoflush(&self) -> bool {
        self.options.autoflush
    }

    /// Returns true if root transactions are faked.
    #[must_use]
    pub fn fake_root_transaction(&self) -> bool {
        self.options.fake_root_transaction
    }

    /// Returns the current (innermost) transaction.
    ///
    /// Under a faked root this is the savepoint the application began; the
    /// faked, parentless root is reported by [`Session::root_transaction`].
    #[must_use]
    pub fn transaction(&self) -> Option<TransactionHandle> {
        self.transactions.last().map(|t| t.handle)
    }

    /// Returns the outermost transaction: the faked root (with no parent)
    /// when root faking applied, otherwise the real root.
    #[must_use]
    pub fn root_transaction(&self) -> Option<TransactionHandle> {
        self.transactions.first().map(|t| t.handle)
    }

    /// Returns true if a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        !self.transactions.is_empty()
    }

    /// Returns the number of open transactions, faked root included.
    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        self.transactions.len()
    }

    /// Returns the connection of the current transaction.
    #[must_use]
    pub fn connection(&self) -> Option<&Connection> {
        self.transactions.last().map(|t| &t.connection)
    }

    /// Returns the number of writes waiting for a flush.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Queues a write.
    pub fn add(&mut self, write: Write) {
        self.pending.push(write);
    }

    /// Queues a put.
    pub fn put(&mut self, table: &str, key: &str, value: impl Into<Vec<u8>>) {
        self.add(Write::put(table, key, value));
    }

    /// Queues a delete.
    pub fn delete(&mut self, table: &str, key: &str) {
        self.add(Write::delete(table, key));
    }

    /// Reads a row through the current transaction, or through a short-lived
    /// connection when none is open.
    ///
    /// Queued writes are only visible if `autoflush` is on.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unbound or the driver fails.
    pub fn get(&mut self, table: &str, key: &str) -> CoreResult<Option<Vec<u8>>> {
        if self.options.autoflush {
            self.flush()?;
        }
        if let Some(current) = self.transactions.last() {
            return current.connection.get(table, key);
        }

        let (connection, owned) = self.acquire_connection()?;
        let result = connection.get(table, key);
        if owned {
            Self::close_owned(&connection);
        }
        result
    }

    /// Begins a transaction.
    ///
    /// When root faking applies and nothing is open, this synthesizes a root
    /// and returns a savepoint inside it instead.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionAlreadyBegun`] if a transaction is
    /// open, or an error from acquiring the connection or from a listener.
    pub fn begin(&mut self) -> CoreResult<TransactionHandle> {
        self.begin_with(false)
    }

    /// Begins a savepoint inside the current transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoTransactionForSavepoint`] if nothing is open
    /// and root faking does not apply.
    pub fn begin_nested(&mut self) -> CoreResult<TransactionHandle> {
        self.begin_with(true)
    }

    /// Commits.
    ///
    /// With a transaction open, or outside autocommit mode, this flushes and
    /// commits the current transaction. In autocommit mode with nothing open
    /// it only flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or committing fails; the transaction is
    /// rolled back in that case.
    pub fn commit(&mut self) -> CoreResult<()> {
        if self.transactions.is_empty() && self.options.autocommit {
            return self.flush();
        }
        if self.transactions.is_empty() {
            self.begin()?;
        }
        if let Err(err) = self.flush_pending() {
            let _ = self.finish_current(false);
            return Err(err);
        }
        self.finish_current(true)
    }

    /// Rolls back the current transaction and discards queued writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to roll back.
    pub fn rollback(&mut self) -> CoreResult<()> {
        if self.transactions.is_empty() {
            self.pending.clear();
            return Ok(());
        }
        self.finish_current(false)
    }

    /// Sends queued writes to the database.
    ///
    /// In autocommit mode with nothing open, the writes run inside their own
    /// `begin`/commit pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unbound or the driver fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if !self.transactions.is_empty() {
            return self.flush_pending();
        }

        self.begin()?;
        if !self.options.autocommit {
            return self.flush_pending();
        }
        if let Err(err) = self.flush_pending() {
            let _ = self.finish_current(false);
            return Err(err);
        }
        self.finish_current(true)
    }

    /// Rolls back every open transaction and discards queued writes.
    ///
    /// The session can be used again afterwards. Dropping a session with
    /// open transactions closes it the same way.
    ///
    /// # Errors
    ///
    /// Returns the first rollback error; the stack is emptied regardless.
    pub fn close(&mut self) -> CoreResult<()> {
        self.pending.clear();
        let mut first_err = None;
        while !self.transactions.is_empty() {
            if let Err(err) = self.finish_current(false) {
                tracing::warn!(error = %err, "rollback failed while closing session");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drops a faked root once every savepoint above it has ended.
    ///
    /// Called by the autocommit coordinator after each transaction end. When
    /// faking is enabled and the only transaction left is a faked root with
    /// no parent, the session goes back to reporting no transaction at all.
    pub fn revert_faked_transaction_if_needed(&mut self) {
        if !self.fake_root_enabled() {
            return;
        }
        let only_faked_root = matches!(
            self.transactions.as_slice(),
            [root] if root.handle.faked && root.handle.parent.is_none()
        );
        if only_faked_root {
            if let Some(root) = self.transactions.pop() {
                tracing::trace!(transaction = %root.handle.id, "reverted faked root transaction");
                Self::release(root);
            }
        }
    }

    fn fake_root_enabled(&self) -> bool {
        self.options.fake_root_transaction
            || self.options.fake_root_detection == FakeRootDetection::ConnectionState
    }

    fn should_fake_root(&self) -> bool {
        match self.options.fake_root_detection {
            FakeRootDetection::Flag => self.options.fake_root_transaction,
            FakeRootDetection::ConnectionState => self
                .bind()
                .and_then(Bind::as_connection)
                .is_some_and(|conn| !conn.dbapi_connection().autocommit()),
        }
    }

    fn begin_with(&mut self, nested: bool) -> CoreResult<TransactionHandle> {
        if self.transactions.is_empty() && self.should_fake_root() {
            self.push_faked_root()?;
            return match self.begin_transaction(true) {
                Ok(handle) => Ok(handle),
                Err(err) => {
                    if let Some(root) = self.transactions.pop() {
                        Self::release(root);
                    }
                    Err(err)
                }
            };
        }
        self.begin_transaction(nested)
    }

    fn push_faked_root(&mut self) -> CoreResult<()> {
        let (connection, owns_connection) = self.acquire_connection()?;
        let handle = TransactionHandle {
            id: TransactionId::generate(),
            nested: false,
            parent: None,
            faked: true,
        };
        tracing::trace!(transaction = %handle.id, connection = %connection.id(), "faked root transaction");
        self.transactions.push(SessionTransaction {
            handle,
            connection,
            owns_connection,
            connection_txn: None,
        });
        Ok(())
    }

    fn begin_transaction(&mut self, nested: bool) -> CoreResult<TransactionHandle> {
        let parent = self
            .transactions
            .last()
            .map(|t| (t.handle.id, t.connection.clone()));

        let (handle, connection, owns_connection, connection_txn) = if nested {
            let Some((parent_id, connection)) = parent else {
                return Err(CoreError::NoTransactionForSavepoint);
            };
            self.flush_pending()?;
            let connection_txn = connection.begin_nested()?;
            let handle = TransactionHandle {
                id: TransactionId::generate(),
                nested: true,
                parent: Some(parent_id),
                faked: false,
            };
            (handle, connection, false, connection_txn)
        } else {
            if parent.is_some() {
                return Err(CoreError::TransactionAlreadyBegun);
            }
            let (connection, owned) = self.acquire_connection()?;
            let connection_txn = match connection.begin() {
                Ok(txn) => txn,
                Err(err) => {
                    if owned {
                        Self::close_owned(&connection);
                    }
                    return Err(err);
                }
            };
            let handle = TransactionHandle {
                id: TransactionId::generate(),
                nested: false,
                parent: None,
                faked: false,
            };
            (handle, connection, owned, connection_txn)
        };

        self.transactions.push(SessionTransaction {
            handle,
            connection: connection.clone(),
            owns_connection,
            connection_txn: Some(connection_txn),
        });

        if let Err(err) = self.dispatch_after_begin(&handle, &connection) {
            // The listener may have partially acted; ending the transaction
            // normally lets it undo.
            if self.transaction().map(|t| t.id) == Some(handle.id) {
                let _ = self.finish_current(false);
            }
            return Err(err);
        }
        Ok(handle)
    }

    /// Pops the current transaction, commits or rolls it back, then notifies
    /// listeners.
    fn finish_current(&mut self, commit: bool) -> CoreResult<()> {
        let Some(current) = self.transactions.pop() else {
            return Ok(());
        };
        if !commit {
            self.pending.clear();
        }

        let SessionTransaction {
            handle,
            connection,
            owns_connection,
            connection_txn,
        } = current;

        let result = match connection_txn {
            Some(txn) if commit => txn.commit(),
            Some(txn) => txn.rollback(),
            None => Ok(()),
        };

        if !handle.faked {
            self.dispatch_after_transaction_end(&handle);
        }
        if owns_connection {
            Self::close_owned(&connection);
        }
        result
    }

    fn flush_pending(&mut self) -> CoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let Some(connection) = self.transactions.last().map(|t| t.connection.clone()) else {
            return Err(CoreError::invalid_operation(
                "cannot flush without an open transaction",
            ));
        };
        let writes = std::mem::take(&mut self.pending);
        for write in &writes {
            connection.execute(write)?;
        }
        Ok(())
    }

    fn acquire_connection(&self) -> CoreResult<(Connection, bool)> {
        match self.bind() {
            Some(Bind::Engine(engine)) => Ok((engine.connect()?, true)),
            Some(Bind::Connection(connection)) => Ok((connection.clone(), false)),
            None => Err(CoreError::UnboundSession),
        }
    }

    fn dispatch_after_begin(
        &mut self,
        handle: &TransactionHandle,
        connection: &Connection,
    ) -> CoreResult<()> {
        let listeners = Arc::clone(&self.listeners);
        for listener in listeners.iter() {
            listener.after_begin(self, handle, connection)?;
        }
        Ok(())
    }

    fn dispatch_after_transaction_end(&mut self, handle: &TransactionHandle) {
        let listeners = Arc::clone(&self.listeners);
        for listener in listeners.iter() {
            listener.after_transaction_end(self, handle);
        }
    }

    fn release(transaction: SessionTransaction) {
        if transaction.owns_connection {
            Self::close_owned(&transaction.connection);
        }
    }

    fn close_owned(connection: &Connection) {
        if let Err(err) = connection.close() {
            tracing::warn!(connection = %connection.id(), error = %err, "failed to close connection");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options)
            .field("transaction", &self.transaction())
            .field("depth", &self.transactions.len())
            .field("pending", &self.pending.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.transactions.is_empty() {
            return;
        }
        tracing::debug!(depth = self.transactions.len(), "closing dropped session");
        let _ = self.close();
    }
}
