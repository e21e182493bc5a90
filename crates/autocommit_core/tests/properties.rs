//! Property tests: autocommit is off exactly while a root transaction is
//! open, whatever the sequence of session calls.

use autocommit_core::{Connection, Database, EngineOptions, HasAutocommitFlag};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Begin,
    BeginNested,
    Put(u8),
    Flush,
    Commit,
    Rollback,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Begin),
        2 => Just(Op::BeginNested),
        3 => any::<u8>().prop_map(Op::Put),
        1 => Just(Op::Flush),
        2 => Just(Op::Commit),
        2 => Just(Op::Rollback),
    ]
}

fn setup() -> (Database, Connection) {
    let db = Database::new();
    let conn = db
        .configure_with_connection("memory://props", EngineOptions::default())
        .unwrap();
    (db, conn)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn autocommit_tracks_root_transaction(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let (db, conn) = setup();
        let mut session = db.session();

        for op in ops {
            let depth_before = session.transaction_depth();
            let result = match &op {
                Op::Begin => session.begin().map(|_| ()),
                Op::BeginNested => session.begin_nested().map(|_| ()),
                Op::Put(k) => {
                    session.put("t", &k.to_string(), vec![*k]);
                    Ok(())
                }
                Op::Flush => session.flush(),
                Op::Commit => session.commit(),
                Op::Rollback => session.rollback(),
            };
            if matches!(op, Op::Begin) && depth_before > 0 {
                prop_assert!(result.is_err());
            } else if matches!(op, Op::BeginNested) && depth_before == 0 {
                prop_assert!(result.is_err());
            } else {
                prop_assert!(result.is_ok());
            }

            let autocommit = conn.dbapi_connection().autocommit();
            prop_assert_eq!(autocommit, !session.in_transaction());
            prop_assert_eq!(
                db.coordinator().tracked_transactions(),
                usize::from(session.in_transaction())
            );
        }

        session.close().unwrap();
        prop_assert!(conn.dbapi_connection().autocommit());
        prop_assert_eq!(db.coordinator().tracked_transactions(), 0);
    }

    #[test]
    fn savepoints_never_touch_the_flag(depth in 1usize..6) {
        let (db, conn) = setup();
        let mut session = db.session();
        session.begin().unwrap();

        for _ in 0..depth {
            session.begin_nested().unwrap();
            prop_assert!(!conn.dbapi_connection().autocommit());
        }
        for _ in 0..depth {
            session.rollback().unwrap();
            prop_assert!(!conn.dbapi_connection().autocommit());
        }

        session.commit().unwrap();
        prop_assert!(conn.dbapi_connection().autocommit());
    }
}
