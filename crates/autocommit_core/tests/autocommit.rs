//! Integration tests for autocommit toggling and faked root transactions.

use autocommit_core::{
    Connection, CoreError, CoreResult, Database, EngineOptions, FakeRootDetection,
    HasAutocommitFlag, IsolationLevel, Session, SessionEvents, SessionOptions, TransactionHandle,
};
use parking_lot::Mutex;
use std::sync::Arc;

fn bound_database(name: &str) -> (Database, Connection) {
    let db = Database::new();
    let conn = db
        .configure_with_connection(&format!("memory://{name}"), EngineOptions::default())
        .unwrap();
    (db, conn)
}

fn autocommit(conn: &Connection) -> bool {
    conn.dbapi_connection().autocommit()
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl SessionEvents for Recorder {
    fn after_begin(
        &self,
        _session: &mut Session,
        transaction: &TransactionHandle,
        connection: &Connection,
    ) -> CoreResult<()> {
        self.events.lock().push(format!(
            "begin nested={} autocommit={}",
            transaction.nested,
            connection.dbapi_connection().autocommit()
        ));
        Ok(())
    }

    fn after_transaction_end(&self, session: &mut Session, transaction: &TransactionHandle) {
        self.events.lock().push(format!(
            "end nested={} depth={}",
            transaction.nested,
            session.transaction_depth()
        ));
    }
}

struct RefuseRoot;

impl SessionEvents for RefuseRoot {
    fn after_begin(
        &self,
        _session: &mut Session,
        transaction: &TransactionHandle,
        _connection: &Connection,
    ) -> CoreResult<()> {
        if transaction.nested {
            Ok(())
        } else {
            Err(CoreError::invalid_operation("refused"))
        }
    }
}

#[test]
fn configured_engine_reports_autocommit() {
    let db = Database::new();
    let engine = db
        .configure("memory://sanity", EngineOptions::default())
        .unwrap();

    assert_eq!(engine.dialect().isolation_level(), IsolationLevel::Autocommit);
    assert_eq!(engine.dialect().isolation_level().as_str(), "AUTOCOMMIT");
    assert!(db.session().autocommit());
}

#[test]
fn root_transaction_disables_autocommit_for_its_span() {
    let (db, conn) = bound_database("root_span");
    let mut session = db.session();
    assert!(autocommit(&conn));

    let txn = session.begin().unwrap();
    assert!(!autocommit(&conn));
    assert!(db.coordinator().is_tracking(txn.id));

    session.commit().unwrap();
    assert!(autocommit(&conn));
    assert!(!db.coordinator().is_tracking(txn.id));
}

#[test]
fn savepoints_leave_autocommit_alone() {
    let (db, conn) = bound_database("savepoints");
    let mut session = db.session();

    session.begin().unwrap();
    let inner = session.begin_nested().unwrap();
    assert!(!autocommit(&conn));
    assert!(!db.coordinator().is_tracking(inner.id));

    session.rollback().unwrap();
    assert!(!autocommit(&conn));
    assert_eq!(db.coordinator().tracked_transactions(), 1);

    session.rollback().unwrap();
    assert!(autocommit(&conn));
    assert_eq!(db.coordinator().tracked_transactions(), 0);
}

#[test]
fn commit_without_transaction_is_a_flush() {
    let (db, conn) = bound_database("flush_only");
    let recorder = Arc::new(Recorder::default());
    db.session_factory().listen(recorder.clone());
    let mut session = db.session();

    session.commit().unwrap();
    assert!(recorder.events.lock().is_empty());

    session.put("users", "1", b"ada".to_vec());
    session.commit().unwrap();

    assert_eq!(
        *recorder.events.lock(),
        vec![
            "begin nested=false autocommit=false".to_string(),
            "end nested=false depth=0".to_string(),
        ]
    );
    assert!(autocommit(&conn));
    assert!(session.transaction().is_none());
    assert_eq!(conn.get("users", "1").unwrap(), Some(b"ada".to_vec()));
}

#[test]
fn listeners_fire_in_order_after_the_coordinator() {
    let (db, _conn) = bound_database("ordering");
    let recorder = Arc::new(Recorder::default());
    db.session_factory().listen(recorder.clone());
    let mut session = db.session();

    session.begin().unwrap();
    session.begin_nested().unwrap();
    session.commit().unwrap();
    session.commit().unwrap();

    assert_eq!(
        *recorder.events.lock(),
        vec![
            "begin nested=false autocommit=false".to_string(),
            "begin nested=true autocommit=false".to_string(),
            "end nested=true depth=1".to_string(),
            "end nested=false depth=0".to_string(),
        ]
    );
}

#[test]
fn failing_listener_aborts_begin_and_restores_autocommit() {
    let (db, conn) = bound_database("refused");
    db.session_factory().listen(Arc::new(RefuseRoot));
    let mut session = db.session();

    let err = session.begin().unwrap_err();

    assert!(matches!(err, CoreError::InvalidOperation { .. }));
    assert!(!session.in_transaction());
    assert!(autocommit(&conn));
    assert_eq!(db.coordinator().tracked_transactions(), 0);
}

#[test]
fn engine_bound_sessions_use_fresh_connections() {
    let db = Database::new();
    db.configure("memory://engine_bound", EngineOptions::default())
        .unwrap();
    let mut writer = db.session();
    let mut reader = db.session();

    writer.begin().unwrap();
    writer.put("t", "k", b"v".to_vec());
    writer.flush().unwrap();
    assert_eq!(reader.get("t", "k").unwrap(), None);

    writer.commit().unwrap();
    assert_eq!(reader.get("t", "k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(db.coordinator().tracked_transactions(), 0);
}

#[test]
fn closed_connection_is_skipped_on_reenable() {
    let (db, conn) = bound_database("closed");
    let mut session = db.session();
    session.begin().unwrap();

    conn.close().unwrap();
    let err = session.rollback().unwrap_err();

    assert!(matches!(err, CoreError::TransactionInactive { .. }));
    assert!(!session.in_transaction());
    assert_eq!(db.coordinator().tracked_transactions(), 0);
}

#[test]
fn dropped_session_releases_the_shared_connection() {
    let (db, conn) = bound_database("dropped");
    {
        let mut session = db.session();
        session.begin().unwrap();
        session.put("t", "lost", b"x".to_vec());
        session.flush().unwrap();
    }

    assert!(autocommit(&conn));
    assert!(!conn.in_transaction());
    assert_eq!(db.coordinator().tracked_transactions(), 0);

    let mut session = db.session();
    session.put("t", "k", b"v".to_vec());
    session.commit().unwrap();

    let other = db.engine().unwrap().connect().unwrap();
    assert_eq!(other.get("t", "k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(other.get("t", "lost").unwrap(), None);
}

/// Opens a connection-level transaction with autocommit forced off, the way
/// a test fixture does.
fn outer_transaction(db: &Database, conn: &Connection) -> autocommit_core::ConnectionTransaction {
    let outer = conn.begin().unwrap();
    db.disable_autocommit(outer.id(), conn).unwrap();
    outer
}

#[test]
fn faked_root_lifecycle() {
    let (db, conn) = bound_database("faked");
    let outer = outer_transaction(&db, &conn);
    let outer_id = outer.id();
    db.session_factory().configure(|o| o.fake_root_transaction(true));
    let mut session = db.session();

    let app = session.begin().unwrap();
    assert!(app.nested);
    let root = session.root_transaction().unwrap();
    assert!(root.faked);
    assert!(root.parent.is_none());
    assert_eq!(app.parent, Some(root.id));

    session.begin_nested().unwrap();
    session.put("t", "k", b"v".to_vec());
    session.rollback().unwrap();
    assert_eq!(session.transaction(), Some(app));
    assert_eq!(session.root_transaction(), Some(root));

    session.put("t", "k", b"v".to_vec());
    session.commit().unwrap();
    assert!(session.transaction().is_none());
    assert!(!autocommit(&conn));
    assert_eq!(conn.get("t", "k").unwrap(), Some(b"v".to_vec()));

    outer.rollback().unwrap();
    db.reenable_autocommit(outer_id);
    assert!(autocommit(&conn));
    assert_eq!(conn.get("t", "k").unwrap(), None);
}

#[test]
fn faked_root_makes_application_commits_inert() {
    let (db, conn) = bound_database("inert");
    let outer = outer_transaction(&db, &conn);
    let outer_id = outer.id();
    db.session_factory().configure(|o| o.fake_root_transaction(true));
    let mut session = db.session();

    session.put("t", "a", b"1".to_vec());
    session.commit().unwrap();
    session.begin().unwrap();
    session.put("t", "b", b"2".to_vec());
    session.commit().unwrap();
    assert_eq!(session.get("t", "b").unwrap(), Some(b"2".to_vec()));

    outer.rollback().unwrap();
    db.reenable_autocommit(outer_id);

    let mut fresh = db.session();
    assert_eq!(fresh.get("t", "a").unwrap(), None);
    assert_eq!(fresh.get("t", "b").unwrap(), None);
}

#[test]
fn connection_state_detection_fakes_only_inside_outer_transaction() {
    let (db, conn) = bound_database("detect");
    let options = SessionOptions::new()
        .bind(&conn)
        .fake_root_detection(FakeRootDetection::ConnectionState);

    let mut plain = db.session_factory().create_with_options(options.clone());
    let txn = plain.begin().unwrap();
    assert!(!txn.nested);
    plain.rollback().unwrap();

    let outer = outer_transaction(&db, &conn);
    let mut faked = db.session_factory().create_with_options(options);
    let txn = faked.begin().unwrap();
    assert!(txn.nested);
    assert!(faked.root_transaction().unwrap().faked);
    faked.commit().unwrap();
    assert!(faked.transaction().is_none());

    let outer_id = outer.id();
    outer.rollback().unwrap();
    db.reenable_autocommit(outer_id);
}

#[test]
fn faked_root_without_outer_transaction_cannot_savepoint() {
    let (db, conn) = bound_database("no_outer");
    db.session_factory().configure(|o| o.fake_root_transaction(true));
    let mut session = db.session();

    let err = session.begin().unwrap_err();

    assert!(matches!(err, CoreError::Driver(_)));
    assert!(!session.in_transaction());
    assert!(autocommit(&conn));
}
