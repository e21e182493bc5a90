//! Scoped session registry.

use super::{Session, SessionFactory};
use crate::config::SessionOptions;
use crate::error::CoreResult;
use parking_lot::Mutex;
use std::sync::Arc;

/// A session shared between the scoped registry and its users.
pub type SharedSession = Arc<Mutex<Session>>;

/// Hands out one session per scope, creating it lazily from a factory.
///
/// The scope ends with [`ScopedSession::remove`], which closes the session;
/// the next access creates a fresh one with the factory's then-current
/// options.
#[derive(Debug, Clone)]
pub struct ScopedSession {
    factory: SessionFactory,
    current: Arc<Mutex<Option<SharedSession>>>,
}

impl ScopedSession {
    /// Creates a registry drawing sessions from `factory`.
    #[must_use]
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            factory,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the underlying factory.
    #[must_use]
    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    /// Reconfigures the factory.
    ///
    /// A session that already exists keeps its old options until removed.
    pub fn configure(&self, update: impl FnOnce(SessionOptions) -> SessionOptions) {
        if self.has_session() {
            tracing::warn!("scoped session reconfigured while a session exists; it keeps its old options");
        }
        self.factory.configure(update);
    }

    /// Returns the current session, creating it if needed.
    #[must_use]
    pub fn session(&self) -> SharedSession {
        let mut current = self.current.lock();
        Arc::clone(current.get_or_insert_with(|| Arc::new(Mutex::new(self.factory.create()))))
    }

    /// Runs `f` with the current session locked.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let session = self.session();
        let mut guard = session.lock();
        f(&mut guard)
    }

    /// Returns true if a session exists in the current scope.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Closes and discards the current session.
    ///
    /// # Errors
    ///
    /// Returns an error if rolling back the session's transactions fails.
    pub fn remove(&self) -> CoreResult<()> {
        let taken = self.current.lock().take();
        if let Some(session) = taken {
            session.lock().close()?;
        }
        Ok(())
    }
}
