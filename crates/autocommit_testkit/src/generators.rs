//! Property-based test generators using proptest.
//!
//! Strategies produce sequences of session calls, so properties can be
//! checked against arbitrary application behaviour inside a fixture.

use autocommit_core::{CoreResult, Session};
use proptest::prelude::*;

/// One call an application makes on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOp {
    /// `begin()`
    Begin,
    /// `begin_nested()`
    BeginNested,
    /// Queue a put.
    Put {
        /// Row key.
        key: String,
        /// Row value.
        value: Vec<u8>,
    },
    /// Queue a delete.
    Delete {
        /// Row key.
        key: String,
    },
    /// `flush()`
    Flush,
    /// `commit()`
    Commit,
    /// `rollback()`
    Rollback,
}

impl SessionOp {
    /// Applies the call to `session`, writing into `table`.
    ///
    /// # Errors
    ///
    /// Returns whatever the session call returns.
    pub fn apply(&self, session: &mut Session, table: &str) -> CoreResult<()> {
        match self {
            Self::Begin => session.begin().map(|_| ()),
            Self::BeginNested => session.begin_nested().map(|_| ()),
            Self::Put { key, value } => {
                session.put(table, key, value.clone());
                Ok(())
            }
            Self::Delete { key } => {
                session.delete(table, key);
                Ok(())
            }
            Self::Flush => session.flush(),
            Self::Commit => session.commit(),
            Self::Rollback => session.rollback(),
        }
    }
}

/// Strategy for generating row keys from a small alphabet, so writes collide.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-e]").expect("Invalid regex")
}

/// Strategy for generating row values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..16)
}

/// Strategy for generating a single session call.
pub fn session_op_strategy() -> impl Strategy<Value = SessionOp> {
    prop_oneof![
        2 => Just(SessionOp::Begin),
        2 => Just(SessionOp::BeginNested),
        4 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| SessionOp::Put { key, value }),
        1 => key_strategy().prop_map(|key| SessionOp::Delete { key }),
        1 => Just(SessionOp::Flush),
        3 => Just(SessionOp::Commit),
        2 => Just(SessionOp::Rollback),
    ]
}

/// Strategy for generating a sequence of session calls.
pub fn session_ops_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<SessionOp>> {
    prop::collection::vec(session_op_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_are_single_letters(key in key_strategy()) {
            prop_assert_eq!(key.len(), 1);
            prop_assert!(key.chars().all(|c| ('a'..='e').contains(&c)));
        }

        #[test]
        fn sequences_respect_bounds(ops in session_ops_strategy(1, 10)) {
            prop_assert!(!ops.is_empty());
            prop_assert!(ops.len() < 10);
        }
    }
}
