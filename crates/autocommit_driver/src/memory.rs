//! In-memory driver for testing.

use crate::connection::{ConnectionId, Driver, DriverConnection, DriverParams, HasAutocommitFlag, Write};
use crate::error::{DriverError, DriverResult};
use crate::url::DatabaseUrl;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Rows = BTreeMap<(String, String), Vec<u8>>;

/// Committed rows of one named in-memory database.
#[derive(Debug, Default)]
struct Store {
    rows: RwLock<Rows>,
}

impl Store {
    fn apply(rows: &mut Rows, write: &Write) {
        match write {
            Write::Put { table, key, value } => {
                rows.insert((table.clone(), key.clone()), value.clone());
            }
            Write::Delete { table, key } => {
                rows.remove(&(table.clone(), key.clone()));
            }
        }
    }
}

/// An in-memory database driver.
///
/// Connections behave like a PostgreSQL DB-API connection:
/// - with autocommit on, every write is immediately durable
/// - with autocommit off, the first write opens a driver transaction
/// - savepoints are rejected while autocommit is on
/// - the autocommit flag cannot change inside an open transaction
///
/// Databases are keyed by the URL's database name, so every connection to
/// `memory://app` sees the same committed rows. Separate driver instances
/// never share data.
///
/// # Example
///
/// ```rust
/// use autocommit_driver::{
///     DatabaseUrl, Driver, DriverConnection, DriverParams, HasAutocommitFlag, InMemoryDriver, Write,
/// };
///
/// let driver = InMemoryDriver::new();
/// let url = DatabaseUrl::parse("memory://app").unwrap();
/// let conn = driver.connect(&url, &DriverParams::new()).unwrap();
/// conn.set_autocommit(true).unwrap();
/// conn.execute(&Write::put("users", "1", b"alice".to_vec())).unwrap();
/// assert_eq!(driver.committed("app", "users", "1"), Some(b"alice".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDriver {
    databases: RwLock<HashMap<String, Arc<Store>>>,
    next_id: AtomicU64,
}

impl InMemoryDriver {
    /// Creates a new driver with no databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, database: &str) -> Arc<Store> {
        if let Some(store) = self.databases.read().get(database) {
            return Arc::clone(store);
        }
        let mut databases = self.databases.write();
        Arc::clone(databases.entry(database.to_string()).or_default())
    }

    /// Returns a committed row, bypassing any connection.
    #[must_use]
    pub fn committed(&self, database: &str, table: &str, key: &str) -> Option<Vec<u8>> {
        let store = self.databases.read().get(database).cloned()?;
        let rows = store.rows.read();
        rows.get(&(table.to_string(), key.to_string())).cloned()
    }

    /// Returns the number of committed rows in a database.
    #[must_use]
    pub fn committed_count(&self, database: &str) -> usize {
        self.databases
            .read()
            .get(database)
            .map_or(0, |store| store.rows.read().len())
    }
}

impl Driver for InMemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn connect(
        &self,
        url: &DatabaseUrl,
        _params: &DriverParams,
    ) -> DriverResult<Arc<dyn DriverConnection>> {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let database = url.database_name();
        tracing::trace!(connection = %id, database, "opened in-memory connection");
        Ok(Arc::new(InMemoryConnection::new(id, self.store(database))))
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    autocommit: bool,
    closed: bool,
    /// Writes of the open driver transaction, in execution order.
    transaction: Option<Vec<Write>>,
    /// Savepoint name -> number of transaction writes when it was taken.
    savepoints: Vec<(String, usize)>,
}

impl ConnectionState {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    fn savepoint_index(&self, name: &str) -> DriverResult<usize> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| DriverError::UnknownSavepoint {
                name: name.to_string(),
            })
    }

    fn end_transaction(&mut self) -> Option<Vec<Write>> {
        self.savepoints.clear();
        self.transaction.take()
    }
}

/// A connection opened by [`InMemoryDriver`].
///
/// New connections start with autocommit off, as DB-API connections do.
#[derive(Debug)]
pub struct InMemoryConnection {
    id: ConnectionId,
    store: Arc<Store>,
    state: Mutex<ConnectionState>,
}

impl InMemoryConnection {
    fn new(id: ConnectionId, store: Arc<Store>) -> Self {
        Self {
            id,
            store,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// Returns the number of writes in the open driver transaction.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.state.lock().transaction.as_ref().map_or(0, Vec::len)
    }
}

impl HasAutocommitFlag for InMemoryConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn autocommit(&self) -> bool {
        self.state.lock().autocommit
    }

    fn set_autocommit(&self, enabled: bool) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if state.transaction.is_some() {
            return Err(DriverError::InTransaction);
        }
        state.autocommit = enabled;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl DriverConnection for InMemoryConnection {
    fn execute(&self, write: &Write) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        if state.autocommit && state.transaction.is_none() {
            let mut rows = self.store.rows.write();
            Store::apply(&mut rows, write);
        } else {
            state
                .transaction
                .get_or_insert_with(Vec::new)
                .push(write.clone());
        }
        Ok(())
    }

    fn get(&self, table: &str, key: &str) -> DriverResult<Option<Vec<u8>>> {
        let state = self.state.lock();
        state.ensure_open()?;

        // Own uncommitted writes shadow committed rows; last write wins.
        if let Some(writes) = &state.transaction {
            for write in writes.iter().rev() {
                if write.target() == (table, key) {
                    return Ok(match write {
                        Write::Put { value, .. } => Some(value.clone()),
                        Write::Delete { .. } => None,
                    });
                }
            }
        }

        let rows = self.store.rows.read();
        Ok(rows.get(&(table.to_string(), key.to_string())).cloned())
    }

    fn commit(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if let Some(writes) = state.end_transaction() {
            let mut rows = self.store.rows.write();
            for write in &writes {
                Store::apply(&mut rows, write);
            }
        }
        Ok(())
    }

    fn rollback(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.end_transaction();
        Ok(())
    }

    fn savepoint(&self, name: &str) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if state.autocommit {
            return Err(DriverError::NoTransaction {
                operation: "SAVEPOINT",
            });
        }
        let mark = state.transaction.get_or_insert_with(Vec::new).len();
        state.savepoints.push((name.to_string(), mark));
        Ok(())
    }

    fn release_savepoint(&self, name: &str) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let idx = state.savepoint_index(name)?;
        state.savepoints.truncate(idx);
        Ok(())
    }

    fn rollback_to_savepoint(&self, name: &str) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let idx = state.savepoint_index(name)?;
        let mark = state.savepoints[idx].1;
        state.savepoints.truncate(idx + 1);
        if let Some(writes) = state.transaction.as_mut() {
            writes.truncate(mark);
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().transaction.is_some()
    }

    fn close(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.end_transaction();
        state.closed = true;
        Ok(())
    }

    fn autocommit_flag(self: Arc<Self>) -> Arc<dyn HasAutocommitFlag> {
        self
    }
}
