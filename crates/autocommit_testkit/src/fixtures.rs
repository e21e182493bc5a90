//! Test fixtures.
//!
//! Three layered resources give every test its own transaction that is
//! rolled back at the end, while application code under test keeps
//! committing as usual:
//!
//! 1. [`Fixtures::configured_autocommit_connection`]: configures the engine
//!    once and binds the session factory to a single connection, cached for
//!    the life of the fixture set.
//! 2. [`Fixtures::db_connection`]: begins a transaction on that connection,
//!    forces autocommit off through the coordinator, and reconfigures the
//!    scoped session to fake root transactions.
//! 3. [`Fixtures::db_session`]: a session bound to the transactional
//!    connection.
//!
//! Teardown runs on drop, in reverse order, even when the test panics.
//!
//! The consumer supplies `test_database_url`, `autocommit_database`, and
//! `scoped_session`. Each layer is also available as a free function taking
//! its collaborators explicitly, for fixture sets composed differently.

use crate::error::{FixtureError, FixtureResult};
use autocommit_core::{
    Connection, ConnectionTransaction, Database, EngineOptions, ScopedSession, Session,
    TransactionId,
};
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// Environment variable read by [`FixtureConfig::from_env`].
pub const TEST_DATABASE_URL_ENV: &str = "TEST_DATABASE_URL";

/// Settings for a fixture set.
#[derive(Debug, Clone, Default)]
pub struct FixtureConfig {
    /// URL of the test database.
    pub database_url: Option<String>,
    /// Options for the engine the fixtures configure.
    pub engine_options: EngineOptions,
}

impl FixtureConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the database URL from `TEST_DATABASE_URL`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var(TEST_DATABASE_URL_ENV).ok(),
            engine_options: EngineOptions::default(),
        }
    }

    /// Sets the database URL.
    #[must_use]
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Sets the engine options.
    #[must_use]
    pub fn engine_options(mut self, options: EngineOptions) -> Self {
        self.engine_options = options;
        self
    }
}

/// Configures `database` for `database_url` and returns a connection the
/// session factory is bound to.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the driver cannot connect.
pub fn configured_connection(
    database: &Database,
    database_url: &str,
    options: EngineOptions,
) -> FixtureResult<Connection> {
    database.configure(database_url, options)?;
    Ok(database.create_connection_with_bound_session()?)
}

/// Wraps `connection` in a test transaction.
///
/// # Errors
///
/// Returns an error if the transaction cannot begin or autocommit cannot
/// be turned off.
///
/// # Panics
///
/// Panics if autocommit on `connection` is already off, which means another
/// test transaction was leaked.
pub fn transactional_connection<'a>(
    database: &'a Database,
    scoped_session: &'a ScopedSession,
    connection: Connection,
) -> FixtureResult<TransactionalConnection<'a>> {
    TransactionalConnection::begin(database, scoped_session, connection, None)
}

/// Creates a session bound to `connection`, closed when dropped.
#[must_use]
pub fn test_session(database: &Database, connection: &Connection) -> TestSession<'static> {
    TestSession {
        session: database.session_factory().create_with_bind(connection),
        connection: None,
    }
}

/// A connection inside a per-test transaction.
///
/// On drop the scoped session is removed, the transaction rolled back, and
/// autocommit re-enabled.
#[derive(Debug)]
pub struct TransactionalConnection<'a> {
    connection: Connection,
    transaction: Option<ConnectionTransaction>,
    database: &'a Database,
    scoped_session: &'a ScopedSession,
    _serial: Option<SerialGuard<'a>>,
}

impl<'a> TransactionalConnection<'a> {
    fn begin(
        database: &'a Database,
        scoped_session: &'a ScopedSession,
        connection: Connection,
        serial: Option<SerialGuard<'a>>,
    ) -> FixtureResult<Self> {
        let transaction = connection.begin()?;
        let id = transaction.id();
        if let Err(err) = database.disable_autocommit(id, &connection) {
            let _ = transaction.rollback();
            return Err(err.into());
        }

        let bind = connection.clone();
        scoped_session.configure(|o| o.bind(bind).fake_root_transaction(true));
        debug!(connection = %connection.id(), transaction = %id, "began test transaction");

        Ok(Self {
            connection,
            transaction: Some(transaction),
            database,
            scoped_session,
            _serial: serial,
        })
    }

    /// Returns the connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns the ID of the test transaction.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(ConnectionTransaction::id)
    }
}

impl Deref for TransactionalConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl Drop for TransactionalConnection<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.scoped_session.remove() {
            warn!(error = %err, "failed to remove scoped session");
        }
        if let Some(transaction) = self.transaction.take() {
            let id = transaction.id();
            if let Err(err) = transaction.rollback() {
                warn!(transaction = %id, error = %err, "failed to roll back test transaction");
            }
            self.database.reenable_autocommit(id);
            debug!(connection = %self.connection.id(), transaction = %id, "rolled back test transaction");
        }
    }
}

/// Holds a fixture set's serial lock and remembers the holding thread.
#[derive(Debug)]
struct SerialGuard<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for SerialGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

/// A session for one test, closed on drop.
///
/// When created by [`Fixtures::db_session`] it also owns the transactional
/// connection, which is torn down after the session closes.
#[derive(Debug)]
pub struct TestSession<'a> {
    session: Session,
    connection: Option<TransactionalConnection<'a>>,
}

impl TestSession<'_> {
    /// Returns the transactional connection, if this session owns one.
    #[must_use]
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref().map(TransactionalConnection::connection)
    }
}

impl Deref for TestSession<'_> {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for TestSession<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl Drop for TestSession<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.session.close() {
            warn!(error = %err, "failed to close test session");
        }
    }
}

/// A set of fixtures sharing one database and one configured connection.
///
/// Tests drawing transactional fixtures from the same set run one at a time.
///
/// # Example
///
/// ```rust
/// use autocommit_core::Database;
/// use autocommit_testkit::Fixtures;
/// use std::sync::Arc;
///
/// let database = Arc::new(Database::new());
/// let fixtures = Fixtures::new()
///     .test_database_url("memory://doc")
///     .scoped_session(database.scoped_session())
///     .autocommit_database(database);
///
/// let mut session = fixtures.db_session().unwrap();
/// session.put("users", "1", b"ada".to_vec());
/// session.commit().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct Fixtures {
    test_database_url: Option<String>,
    autocommit_database: Option<Arc<Database>>,
    scoped_session: Option<ScopedSession>,
    engine_options: EngineOptions,
    configured: Mutex<Option<Connection>>,
    serial: Mutex<()>,
    serial_owner: Mutex<Option<ThreadId>>,
}

impl Fixtures {
    /// Creates a fixture set with nothing supplied.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fixture set from a configuration.
    #[must_use]
    pub fn from_config(config: FixtureConfig) -> Self {
        Self {
            test_database_url: config.database_url,
            engine_options: config.engine_options,
            ..Self::default()
        }
    }

    /// Supplies the test database URL.
    #[must_use]
    pub fn test_database_url(mut self, url: impl Into<String>) -> Self {
        self.test_database_url = Some(url.into());
        self
    }

    /// Supplies the database.
    #[must_use]
    pub fn autocommit_database(mut self, database: Arc<Database>) -> Self {
        self.autocommit_database = Some(database);
        self
    }

    /// Supplies the scoped session that application code uses.
    #[must_use]
    pub fn scoped_session(mut self, scoped_session: ScopedSession) -> Self {
        self.scoped_session = Some(scoped_session);
        self
    }

    /// Sets the engine options used when configuring.
    #[must_use]
    pub fn engine_options(mut self, options: EngineOptions) -> Self {
        self.engine_options = options;
        self
    }

    /// Returns the test database URL.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NotConfigured`] if it was never supplied.
    pub fn get_test_database_url(&self) -> FixtureResult<&str> {
        self.test_database_url
            .as_deref()
            .ok_or_else(|| FixtureError::not_configured("test_database_url"))
    }

    /// Returns the database.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NotConfigured`] if it was never supplied.
    pub fn get_autocommit_database(&self) -> FixtureResult<&Arc<Database>> {
        self.autocommit_database
            .as_ref()
            .ok_or_else(|| FixtureError::not_configured("autocommit_database"))
    }

    /// Returns the scoped session.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NotConfigured`] if it was never supplied.
    pub fn get_scoped_session(&self) -> FixtureResult<&ScopedSession> {
        self.scoped_session
            .as_ref()
            .ok_or_else(|| FixtureError::not_configured("scoped_session"))
    }

    /// Returns the shared connection, configuring the engine on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if a fixture is missing or connecting fails.
    pub fn configured_autocommit_connection(&self) -> FixtureResult<Connection> {
        let mut configured = self.configured.lock();
        if let Some(connection) = configured.as_ref() {
            return Ok(connection.clone());
        }
        let database = self.get_autocommit_database()?;
        let url = self.get_test_database_url()?;
        let connection = configured_connection(database, url, self.engine_options.clone())?;
        *configured = Some(connection.clone());
        Ok(connection)
    }

    /// Begins a per-test transaction on the shared connection.
    ///
    /// Blocks while another thread holds one from this set. To get a
    /// session inside a transaction you already hold, use
    /// [`Fixtures::session_for`].
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::AlreadyHeld`] if the calling thread already
    /// holds a transactional fixture from this set, or an error if a fixture
    /// is missing or the transaction cannot begin.
    pub fn db_connection(&self) -> FixtureResult<TransactionalConnection<'_>> {
        let connection = self.configured_autocommit_connection()?;
        let database = self.get_autocommit_database()?;
        let scoped_session = self.get_scoped_session()?;
        let serial = self.lock_serial()?;
        TransactionalConnection::begin(database, scoped_session, connection, Some(serial))
    }

    /// Returns a session bound to a transactional connection the caller
    /// already holds.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NotConfigured`] without a database.
    pub fn session_for(&self, connection: &Connection) -> FixtureResult<TestSession<'static>> {
        let database = self.get_autocommit_database()?;
        Ok(test_session(database, connection))
    }

    fn lock_serial(&self) -> FixtureResult<SerialGuard<'_>> {
        let current = thread::current().id();
        if *self.serial_owner.lock() == Some(current) {
            return Err(FixtureError::AlreadyHeld {
                fixture: "db_connection",
            });
        }
        let guard = self.serial.lock();
        *self.serial_owner.lock() = Some(current);
        Ok(SerialGuard {
            owner: &self.serial_owner,
            _guard: guard,
        })
    }

    /// Returns a session bound to a fresh per-test transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if [`Fixtures::db_connection`] fails.
    pub fn db_session(&self) -> FixtureResult<TestSession<'_>> {
        let connection = self.db_connection()?;
        let database = self.get_autocommit_database()?;
        let session = database.session_factory().create_with_bind(connection.connection());
        Ok(TestSession {
            session,
            connection: Some(connection),
        })
    }
}

/// Runs `f` with a per-test session from `fixtures`.
///
/// # Errors
///
/// Returns an error if the fixtures cannot be set up.
pub fn with_db_session<F, R>(fixtures: &Fixtures, f: F) -> FixtureResult<R>
where
    F: FnOnce(&mut Session) -> R,
{
    let mut session = fixtures.db_session()?;
    Ok(f(&mut session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autocommit_core::HasAutocommitFlag;

    fn fixtures(name: &str) -> Fixtures {
        let database = Arc::new(Database::new());
        Fixtures::new()
            .test_database_url(format!("memory://{name}"))
            .scoped_session(database.scoped_session())
            .autocommit_database(database)
    }

    #[test]
    fn missing_url_fails_fast() {
        let database = Arc::new(Database::new());
        let fixtures = Fixtures::new()
            .scoped_session(database.scoped_session())
            .autocommit_database(database);

        let err = fixtures.db_connection().unwrap_err();
        assert_eq!(err.missing_fixture(), Some("test_database_url"));
    }

    #[test]
    fn missing_database_fails_fast() {
        let err = Fixtures::new()
            .test_database_url("memory://x")
            .configured_autocommit_connection()
            .unwrap_err();
        assert_eq!(err.missing_fixture(), Some("autocommit_database"));
    }

    #[test]
    fn missing_scoped_session_fails_fast() {
        let fixtures = Fixtures::new()
            .test_database_url("memory://x")
            .autocommit_database(Arc::new(Database::new()));
        let err = fixtures.db_connection().unwrap_err();
        assert_eq!(err.missing_fixture(), Some("scoped_session"));
    }

    #[test]
    fn configured_connection_is_cached() {
        let fixtures = fixtures("cached");
        let a = fixtures.configured_autocommit_connection().unwrap();
        let b = fixtures.configured_autocommit_connection().unwrap();
        assert!(a.same_as(&b));
        assert!(a.dbapi_connection().autocommit());
    }

    #[test]
    fn db_connection_holds_autocommit_off_until_dropped() {
        let fixtures = fixtures("held");
        let shared = fixtures.configured_autocommit_connection().unwrap();
        {
            let conn = fixtures.db_connection().unwrap();
            assert!(conn.transaction_id().is_some());
            assert!(!conn.dbapi_connection().autocommit());
            assert!(fixtures.get_scoped_session().unwrap().factory().options().fake_root_transaction);
        }
        assert!(shared.dbapi_connection().autocommit());
        let database = fixtures.get_autocommit_database().unwrap();
        assert_eq!(database.coordinator().tracked_transactions(), 0);
    }

    #[test]
    fn second_transactional_fixture_on_one_thread_fails_fast() {
        let fixtures = fixtures("reentry");
        let conn = fixtures.db_connection().unwrap();

        let err = fixtures.db_session().unwrap_err();
        assert!(matches!(err, FixtureError::AlreadyHeld { fixture: "db_connection" }));

        let mut session = fixtures.session_for(&conn).unwrap();
        session.put("t", "k", b"v".to_vec());
        session.commit().unwrap();
        assert_eq!(conn.get("t", "k").unwrap(), Some(b"v".to_vec()));
        drop(session);
        drop(conn);

        let again = fixtures.db_session().unwrap();
        assert_eq!(again.connection().unwrap().get("t", "k").unwrap(), None);
    }

    #[test]
    fn from_config_uses_url() {
        let config = FixtureConfig::new().database_url("memory://cfg");
        let fixtures = Fixtures::from_config(config);
        assert_eq!(fixtures.get_test_database_url().unwrap(), "memory://cfg");
    }

    #[test]
    fn standalone_factories_compose() {
        let database = Database::new();
        let scoped = database.scoped_session();
        let shared = configured_connection(&database, "memory://standalone", EngineOptions::default())
            .unwrap();
        {
            let conn = transactional_connection(&database, &scoped, shared.clone()).unwrap();
            let mut session = test_session(&database, &conn);
            session.put("t", "k", b"v".to_vec());
            session.commit().unwrap();
            assert_eq!(conn.get("t", "k").unwrap(), Some(b"v".to_vec()));
        }
        assert!(shared.dbapi_connection().autocommit());
        assert_eq!(shared.get("t", "k").unwrap(), None);
    }
}
