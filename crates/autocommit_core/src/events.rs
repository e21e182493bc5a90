//! Session lifecycle events.
//!
//! Listeners are registered on a [`crate::SessionFactory`] and copied into
//! every session it creates. Callbacks run synchronously inside the session
//! call that triggered them:
//!
//! - `after_begin` fires once a transaction has a connection and a
//!   connection-level begin (or savepoint) in place, before any statement
//!   runs on it. Faked root transactions never fire it.
//! - `after_transaction_end` fires after commit or rollback completed and the
//!   transaction was popped, so the parent (if any) is already current.

use crate::engine::Connection;
use crate::error::CoreResult;
use crate::session::Session;
use crate::types::TransactionHandle;

/// Observer of session transaction lifecycles.
///
/// Both callbacks default to doing nothing.
pub trait SessionEvents: Send + Sync {
    /// Called after a transaction began on `connection`.
    ///
    /// An error aborts the begin: the session rolls the new transaction back
    /// and returns the error to the caller.
    fn after_begin(
        &self,
        session: &mut Session,
        transaction: &TransactionHandle,
        connection: &Connection,
    ) -> CoreResult<()> {
        let _ = (session, transaction, connection);
        Ok(())
    }

    /// Called after a transaction ended.
    fn after_transaction_end(&self, session: &mut Session, transaction: &TransactionHandle) {
        let _ = (session, transaction);
    }
}
