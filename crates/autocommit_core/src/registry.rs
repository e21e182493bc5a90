//! Transaction registry.

use crate::types::TransactionId;
use autocommit_driver::{ConnectionId, HasAutocommitFlag};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Connections whose autocommit flag a transaction turned off.
pub type ConnectionSet = BTreeMap<ConnectionId, Arc<dyn HasAutocommitFlag>>;

/// Maps open transactions to the driver connections whose autocommit flag
/// they disabled.
///
/// The registry does no locking of its own; the coordinator owns it.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    entries: HashMap<TransactionId, ConnectionSet>,
}

impl TransactionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `transaction` disabled autocommit on `connection`.
    ///
    /// Recording the same pair twice is a no-op.
    pub fn record(&mut self, transaction: TransactionId, connection: Arc<dyn HasAutocommitFlag>) {
        self.entries
            .entry(transaction)
            .or_default()
            .insert(connection.connection_id(), connection);
    }

    /// Removes and returns the connections recorded for `transaction`.
    pub fn release(&mut self, transaction: TransactionId) -> Option<ConnectionSet> {
        self.entries.remove(&transaction)
    }

    /// Returns true if `transaction` has an entry.
    #[must_use]
    pub fn contains(&self, transaction: TransactionId) -> bool {
        self.entries.contains_key(&transaction)
    }

    /// Returns the transaction holding `connection`, if any.
    #[must_use]
    pub fn holder_of(&self, connection: ConnectionId) -> Option<TransactionId> {
        self.entries
            .iter()
            .find(|(_, set)| set.contains_key(&connection))
            .map(|(txn, _)| *txn)
    }

    /// Returns the number of transactions with entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no transaction has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
