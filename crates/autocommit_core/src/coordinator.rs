//! Autocommit coordinator.
//!
//! Keeps the driver's autocommit flag in step with session transactions:
//!
//! ```text
//!   flag: true ──begin(root)──▶ false ──commit/rollback──▶ true
//!                 │                        │
//!                 └─ record(txn → conn)     └─ release(txn), re-enable
//! ```
//!
//! Savepoints never touch the flag, and a root transaction that begins on a
//! connection whose flag is already off (because an outer mechanism turned
//! it off) is left alone.

use crate::engine::Connection;
use crate::error::CoreResult;
use crate::events::SessionEvents;
use crate::registry::TransactionRegistry;
use crate::session::Session;
use crate::types::{TransactionHandle, TransactionId};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Disables autocommit for the span of every root transaction and re-enables
/// it when the transaction ends.
///
/// # Panics
///
/// Mismatched begin/end bookkeeping is a programming error, not a runtime
/// condition. The coordinator panics when:
/// - a connection would be disabled twice without an intervening re-enable
/// - a recorded connection is found with autocommit already on at re-enable
/// - a transaction with no entry is explicitly re-enabled
/// - the driver fails to re-enable for any reason other than being closed
#[derive(Debug, Default)]
pub struct AutocommitCoordinator {
    registry: Mutex<TransactionRegistry>,
}

impl AutocommitCoordinator {
    /// Creates a coordinator with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables autocommit if `transaction` is a root transaction on a
    /// connection that is still in autocommit mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses to change the flag.
    pub fn handle_after_transaction_begin(
        &self,
        transaction: &TransactionHandle,
        connection: &Connection,
    ) -> CoreResult<()> {
        if self.should_disable_autocommit(transaction, connection) {
            self.disable_autocommit(transaction.id, connection)?;
        }
        Ok(())
    }

    /// Returns true if beginning `transaction` must turn autocommit off.
    #[must_use]
    pub fn should_disable_autocommit(
        &self,
        transaction: &TransactionHandle,
        connection: &Connection,
    ) -> bool {
        connection.dbapi_connection().autocommit() && !transaction.nested
    }

    /// Turns autocommit off on `connection` and records it under
    /// `transaction`.
    ///
    /// Fixtures call this directly for connection-level transactions that no
    /// session event covers.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses to change the flag.
    ///
    /// # Panics
    ///
    /// Panics if the connection's autocommit is already off or another live
    /// transaction recorded it.
    pub fn disable_autocommit(
        &self,
        transaction: TransactionId,
        connection: &Connection,
    ) -> CoreResult<()> {
        let flag = connection.dbapi_connection();
        let mut registry = self.registry.lock();

        if let Some(holder) = registry.holder_of(flag.connection_id()) {
            panic!(
                "autocommit on {} is already disabled by {holder}; begin/end events are mismatched",
                flag.connection_id()
            );
        }
        assert!(
            flag.autocommit(),
            "autocommit on {} is already disabled outside the coordinator",
            flag.connection_id()
        );

        flag.set_autocommit(false)?;
        debug!(
            transaction = %transaction,
            connection = %flag.connection_id(),
            "disabled autocommit"
        );
        registry.record(transaction, flag);
        Ok(())
    }

    /// Re-enables autocommit if `transaction` disabled it, then lets the
    /// session drop a faked root it may be holding.
    pub fn handle_after_transaction_end(
        &self,
        session: &mut Session,
        transaction: &TransactionHandle,
    ) {
        if self.should_reenable_autocommit(transaction.id) {
            self.reenable_autocommit(transaction.id);
        }
        session.revert_faked_transaction_if_needed();
    }

    /// Returns true if `transaction` has connections to re-enable.
    #[must_use]
    pub fn should_reenable_autocommit(&self, transaction: TransactionId) -> bool {
        self.registry.lock().contains(transaction)
    }

    /// Turns autocommit back on for every connection recorded under
    /// `transaction` and forgets the entry. Closed connections are skipped.
    ///
    /// # Panics
    ///
    /// Panics if `transaction` has no entry, if a recorded connection already
    /// has autocommit on, or if the driver fails for a reason other than the
    /// connection being closed.
    pub fn reenable_autocommit(&self, transaction: TransactionId) {
        let Some(connections) = self.registry.lock().release(transaction) else {
            panic!("{transaction} never disabled autocommit");
        };

        for (id, flag) in connections {
            if flag.is_closed() {
                warn!(transaction = %transaction, connection = %id, "skipping closed connection");
                continue;
            }
            assert!(
                !flag.autocommit(),
                "autocommit on {id} was re-enabled behind the coordinator's back"
            );
            match flag.set_autocommit(true) {
                Ok(()) => {
                    debug!(transaction = %transaction, connection = %id, "re-enabled autocommit");
                }
                Err(err) if err.is_closed() => {
                    warn!(transaction = %transaction, connection = %id, "connection closed during re-enable");
                }
                Err(err) => panic!("failed to re-enable autocommit on {id}: {err}"),
            }
        }
    }

    /// Returns true if `transaction` currently has autocommit disabled.
    #[must_use]
    pub fn is_tracking(&self, transaction: TransactionId) -> bool {
        self.registry.lock().contains(transaction)
    }

    /// Returns the number of transactions currently holding autocommit off.
    #[must_use]
    pub fn tracked_transactions(&self) -> usize {
        self.registry.lock().len()
    }
}

impl SessionEvents for AutocommitCoordinator {
    fn after_begin(
        &self,
        _session: &mut Session,
        transaction: &TransactionHandle,
        connection: &Connection,
    ) -> CoreResult<()> {
        self.handle_after_transaction_begin(transaction, connection)
    }

    fn after_transaction_end(&self, session: &mut Session, transaction: &TransactionHandle) {
        self.handle_after_transaction_end(session, transaction);
    }
}
