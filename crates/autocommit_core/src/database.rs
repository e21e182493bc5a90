//! The database facade: one engine, one session factory, one coordinator.

use crate::config::{EngineOptions, IsolationLevel, SessionOptions};
use crate::coordinator::AutocommitCoordinator;
use crate::engine::{Connection, Engine};
use crate::error::{CoreError, CoreResult};
use crate::events::SessionEvents;
use crate::session::{ScopedSession, Session, SessionFactory};
use crate::types::TransactionId;
use autocommit_driver::{DatabaseUrl, Driver, InMemoryDriver};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Ties an autocommit engine to a session factory whose sessions keep the
/// driver's autocommit flag off for exactly the span of each root
/// transaction.
///
/// # Example
///
/// ```rust
/// use autocommit_core::{Database, EngineOptions};
///
/// let db = Database::new();
/// db.configure("memory://app", EngineOptions::default()).unwrap();
///
/// let mut session = db.session();
/// session.put("users", "1", b"ada".to_vec());
/// session.commit().unwrap();
///
/// assert_eq!(session.get("users", "1").unwrap(), Some(b"ada".to_vec()));
/// ```
pub struct Database {
    engine: RwLock<Option<Arc<Engine>>>,
    session_factory: SessionFactory,
    coordinator: Arc<AutocommitCoordinator>,
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl Database {
    /// Creates an unconfigured database.
    ///
    /// The coordinator is registered on the session factory, and the
    /// `memory` scheme is served by a fresh [`InMemoryDriver`].
    #[must_use]
    pub fn new() -> Self {
        let coordinator = Arc::new(AutocommitCoordinator::new());
        let session_factory =
            SessionFactory::new(SessionOptions::new().autocommit(true).autoflush(false));
        session_factory.listen(Arc::clone(&coordinator) as Arc<dyn SessionEvents>);

        let mut drivers: HashMap<String, Arc<dyn Driver>> = HashMap::new();
        drivers.insert("memory".to_string(), Arc::new(InMemoryDriver::new()));

        Self {
            engine: RwLock::new(None),
            session_factory,
            coordinator,
            drivers: RwLock::new(drivers),
        }
    }

    /// Serves URLs with `scheme` through `driver`, replacing any previous
    /// registration.
    pub fn register_driver(&self, scheme: impl Into<String>, driver: Arc<dyn Driver>) {
        self.drivers.write().insert(scheme.into(), driver);
    }

    /// Returns the driver registered for `scheme`.
    #[must_use]
    pub fn driver(&self, scheme: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.read().get(scheme).cloned()
    }

    /// Creates the engine and binds the session factory to it.
    ///
    /// The isolation level is always forced to autocommit; any other
    /// requested level is overridden with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or its scheme has no driver.
    pub fn configure(&self, database_url: &str, options: EngineOptions) -> CoreResult<Arc<Engine>> {
        let url = DatabaseUrl::parse(database_url)?;
        let driver = self
            .driver(url.scheme())
            .ok_or_else(|| CoreError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
            })?;

        if !options.isolation_level.is_autocommit() {
            warn!(
                requested = %options.isolation_level,
                "isolation level overridden with AUTOCOMMIT"
            );
        }
        let options = options.isolation_level(IsolationLevel::Autocommit);
        let engine = Arc::new(Engine::new(url, driver, options));
        info!(url = %engine.url(), dialect = engine.dialect().name(), "configured autocommit engine");

        *self.engine.write() = Some(Arc::clone(&engine));
        let bind = Arc::clone(&engine);
        self.session_factory.configure(|o| o.bind(bind));
        Ok(engine)
    }

    /// Configures the engine, then binds the session factory to a single
    /// live connection instead.
    ///
    /// # Errors
    ///
    /// Returns an error if configuring or connecting fails.
    pub fn configure_with_connection(
        &self,
        database_url: &str,
        options: EngineOptions,
    ) -> CoreResult<Connection> {
        self.configure(database_url, options)?;
        self.create_connection_with_bound_session()
    }

    /// Opens a connection and binds the session factory to it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotConfigured`] before [`Database::configure`],
    /// or a driver error.
    pub fn create_connection_with_bound_session(&self) -> CoreResult<Connection> {
        let connection = self.engine()?.connect()?;
        let bind = connection.clone();
        self.session_factory.configure(|o| o.bind(bind));
        Ok(connection)
    }

    /// Returns the engine.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotConfigured`] before [`Database::configure`].
    pub fn engine(&self) -> CoreResult<Arc<Engine>> {
        self.engine
            .read()
            .clone()
            .ok_or_else(|| CoreError::not_configured("engine"))
    }

    /// Returns true once an engine is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.engine.read().is_some()
    }

    /// Returns the session factory.
    #[must_use]
    pub fn session_factory(&self) -> &SessionFactory {
        &self.session_factory
    }

    /// Creates a session from the factory.
    #[must_use]
    pub fn session(&self) -> Session {
        self.session_factory.create()
    }

    /// Returns a new scoped session registry over the factory.
    #[must_use]
    pub fn scoped_session(&self) -> ScopedSession {
        ScopedSession::new(self.session_factory.clone())
    }

    /// Returns the coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<AutocommitCoordinator> {
        &self.coordinator
    }

    /// See [`AutocommitCoordinator::disable_autocommit`].
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses to change the flag.
    pub fn disable_autocommit(
        &self,
        transaction: TransactionId,
        connection: &Connection,
    ) -> CoreResult<()> {
        self.coordinator.disable_autocommit(transaction, connection)
    }

    /// See [`AutocommitCoordinator::reenable_autocommit`].
    pub fn reenable_autocommit(&self, transaction: TransactionId) {
        self.coordinator.reenable_autocommit(transaction);
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<String> = self.drivers.read().keys().cloned().collect();
        schemes.sort();
        f.debug_struct("Database")
            .field("engine", &*self.engine.read())
            .field("session_factory", &self.session_factory)
            .field("coordinator", &self.coordinator)
            .field("drivers", &schemes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Bind;

    #[test]
    fn unconfigured_engine_is_an_error() {
        let db = Database::new();
        assert!(!db.is_configured());
        let err = db.engine().unwrap_err();
        assert!(matches!(err, CoreError::NotConfigured { .. }));
        assert!(db.create_connection_with_bound_session().is_err());
    }

    #[test]
    fn configure_forces_autocommit() {
        let db = Database::new();
        let engine = db
            .configure(
                "memory://app",
                EngineOptions::new().isolation_level(IsolationLevel::Serializable),
            )
            .unwrap();

        assert_eq!(engine.dialect().isolation_level().as_str(), "AUTOCOMMIT");
        assert!(db.session().autocommit());
        assert!(matches!(db.session().bind(), Some(Bind::Engine(_))));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let db = Database::new();
        let err = db
            .configure("postgresql://localhost/app", EngineOptions::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedScheme { ref scheme } if scheme == "postgresql"));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let db = Database::new();
        let err = db.configure("no-scheme", EngineOptions::default()).unwrap_err();
        assert!(matches!(err, CoreError::Driver(_)));
    }

    #[test]
    fn connection_bind_replaces_engine_bind() {
        let db = Database::new();
        let conn = db
            .configure_with_connection("memory://app", EngineOptions::default())
            .unwrap();

        let session = db.session();
        let bound = session.bind().and_then(Bind::as_connection).unwrap();
        assert!(bound.same_as(&conn));
        assert!(conn.dbapi_connection().autocommit());
    }

    #[test]
    fn coordinator_is_registered() {
        let db = Database::new();
        assert_eq!(db.session_factory().listener_count(), 1);
    }

    #[test]
    fn registered_driver_serves_scheme() {
        let db = Database::new();
        db.register_driver("other", Arc::new(InMemoryDriver::new()));
        let engine = db.configure("other://x", EngineOptions::default()).unwrap();
        assert_eq!(engine.dialect().name(), "other");
    }
}
