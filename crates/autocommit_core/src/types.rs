//! Core type definitions.

use std::fmt;
use uuid::Uuid;

/// Unique identifier for a transaction span.
///
/// Connection-level and session-level transactions share this id space, so
/// either can key the autocommit registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a new random transaction ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0.simple())
    }
}

/// A lightweight view of a session transaction, handed to event listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle {
    /// Transaction ID.
    pub id: TransactionId,
    /// Whether this is a savepoint inside a parent transaction.
    pub nested: bool,
    /// The enclosing transaction, if any.
    pub parent: Option<TransactionId>,
    /// Whether the session synthesized this transaction without a
    /// connection-level begin.
    pub faked: bool,
}

impl TransactionHandle {
    /// Returns true for an outermost transaction.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = TransactionId::generate();
        let b = TransactionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn transaction_id_display() {
        let id = TransactionId::from_uuid(Uuid::nil());
        assert_eq!(id.to_string(), "txn:00000000000000000000000000000000");
    }

    #[test]
    fn root_has_no_parent() {
        let root = TransactionHandle {
            id: TransactionId::generate(),
            nested: false,
            parent: None,
            faked: false,
        };
        let child = TransactionHandle {
            id: TransactionId::generate(),
            nested: true,
            parent: Some(root.id),
            faked: false,
        };
        assert!(root.is_root());
        assert!(!child.is_root());
    }
}
