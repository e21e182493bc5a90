//! Engine and session configuration.

use crate::engine::Bind;
use autocommit_driver::DriverParams;
use std::fmt;

/// Transaction isolation level requested from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Every statement commits on its own; the driver's autocommit flag is on.
    #[default]
    Autocommit,
    /// READ COMMITTED.
    ReadCommitted,
    /// REPEATABLE READ.
    RepeatableRead,
    /// SERIALIZABLE.
    Serializable,
}

impl IsolationLevel {
    /// Returns the level as it is spelled in SQL.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Autocommit => "AUTOCOMMIT",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// Returns true if connections at this level run in autocommit mode.
    #[must_use]
    pub const fn is_autocommit(self) -> bool {
        matches!(self, Self::Autocommit)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for creating an engine.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Isolation level for new connections.
    pub isolation_level: IsolationLevel,
    /// Driver-specific parameters, passed through untouched.
    pub driver_params: DriverParams,
}

impl EngineOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the isolation level.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Adds a driver parameter.
    #[must_use]
    pub fn driver_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.driver_params.insert(key.into(), value.into());
        self
    }
}

/// How a session decides that a root `begin` must be faked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FakeRootDetection {
    /// Fake when the session's `fake_root_transaction` option is set.
    #[default]
    Flag,
    /// Fake when the bound connection already has autocommit disabled,
    /// i.e. someone outside the session opened a transaction on it.
    ///
    /// Depends on the coordinator having run first; prefer [`Self::Flag`].
    ConnectionState,
}

/// Options used by a session factory to create sessions.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Engine or connection new sessions acquire connections from.
    pub bind: Option<Bind>,
    /// Whether sessions start without an implicit transaction.
    pub autocommit: bool,
    /// Whether reads flush pending writes first.
    pub autoflush: bool,
    /// Whether a root `begin` synthesizes a fake root plus a savepoint.
    pub fake_root_transaction: bool,
    /// Strategy for deciding when to fake a root transaction.
    pub fake_root_detection: FakeRootDetection,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            bind: None,
            autocommit: true,
            autoflush: false,
            fake_root_transaction: false,
            fake_root_detection: FakeRootDetection::Flag,
        }
    }
}

impl SessionOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind.
    #[must_use]
    pub fn bind(mut self, bind: impl Into<Bind>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    /// Sets autocommit mode.
    #[must_use]
    pub fn autocommit(mut self, value: bool) -> Self {
        self.autocommit = value;
        self
    }

    /// Sets autoflush.
    #[must_use]
    pub fn autoflush(mut self, value: bool) -> Self {
        self.autoflush = value;
        self
    }

    /// Sets whether root transactions are faked.
    #[must_use]
    pub fn fake_root_transaction(mut self, value: bool) -> Self {
        self.fake_root_transaction = value;
        self
    }

    /// Sets the fake-root detection strategy.
    #[must_use]
    pub fn fake_root_detection(mut self, detection: FakeRootDetection) -> Self {
        self.fake_root_detection = detection;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_isolation_is_autocommit() {
        let options = EngineOptions::default();
        assert_eq!(options.isolation_level, IsolationLevel::Autocommit);
        assert_eq!(options.isolation_level.as_str(), "AUTOCOMMIT");
    }

    #[test]
    fn engine_builder() {
        let options = EngineOptions::new()
            .isolation_level(IsolationLevel::Serializable)
            .driver_param("connect_timeout", "5");
        assert!(!options.isolation_level.is_autocommit());
        assert_eq!(options.driver_params.get("connect_timeout").map(String::as_str), Some("5"));
    }

    #[test]
    fn default_session_options() {
        let options = SessionOptions::default();
        assert!(options.autocommit);
        assert!(!options.autoflush);
        assert!(!options.fake_root_transaction);
        assert_eq!(options.fake_root_detection, FakeRootDetection::Flag);
        assert!(options.bind.is_none());
    }

    #[test]
    fn session_builder() {
        let options = SessionOptions::new()
            .autocommit(false)
            .fake_root_transaction(true)
            .fake_root_detection(FakeRootDetection::ConnectionState);
        assert!(!options.autocommit);
        assert!(options.fake_root_transaction);
        assert_eq!(
            options.fake_root_detection,
            FakeRootDetection::ConnectionState
        );
    }
}
