//! Error types for fixtures.

use autocommit_core::CoreError;
use thiserror::Error;

/// Result type for fixture setup.
pub type FixtureResult<T> = Result<T, FixtureError>;

/// Where to read about supplying fixtures.
pub const FIXTURES_DOCS: &str = "see the `Fixtures` documentation in autocommit_testkit";

/// Errors raised while setting up fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// A fixture the consumer must supply was never provided.
    #[error("fixture `{fixture}` is not configured; {docs}")]
    NotConfigured {
        /// The missing fixture's name.
        fixture: &'static str,
        /// Pointer to the documentation.
        docs: &'static str,
    },

    /// The calling thread already holds a transactional fixture from this
    /// set; taking another would wait on itself.
    #[error("fixture `{fixture}` is already held by this thread; use `Fixtures::session_for` to share it")]
    AlreadyHeld {
        /// The held fixture's name.
        fixture: &'static str,
    },

    /// Engine, connection, or session error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl FixtureError {
    /// Creates a not-configured error for `fixture`.
    pub fn not_configured(fixture: &'static str) -> Self {
        Self::NotConfigured {
            fixture,
            docs: FIXTURES_DOCS,
        }
    }

    /// Returns the missing fixture's name, if this is a configuration error.
    #[must_use]
    pub fn missing_fixture(&self) -> Option<&'static str> {
        match self {
            Self::NotConfigured { fixture, .. } => Some(fixture),
            Self::AlreadyHeld { .. } | Self::Core(_) => None,
        }
    }
}
