//! # Autocommit Core
//!
//! Sessions that run in driver-level autocommit mode by default and switch
//! autocommit off only for the span of an explicit transaction.
//!
//! This crate provides:
//! - Engines and shared connection handles over a driver
//! - Sessions with a transaction stack, savepoints, and queued writes
//! - An autocommit coordinator that toggles the driver flag around root
//!   transactions
//! - Faked root transactions, so code under test can commit freely inside a
//!   fixture-owned transaction
//!
//! ## Example
//!
//! ```rust
//! use autocommit_core::{Database, EngineOptions};
//!
//! let db = Database::new();
//! let engine = db.configure("memory://app", EngineOptions::default()).unwrap();
//! assert_eq!(engine.dialect().isolation_level().as_str(), "AUTOCOMMIT");
//!
//! let mut session = db.session();
//! let txn = session.begin().unwrap();
//! assert!(db.coordinator().is_tracking(txn.id));
//! session.rollback().unwrap();
//! assert!(!db.coordinator().is_tracking(txn.id));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod database;
mod engine;
mod error;
mod events;
mod registry;
mod session;
mod types;

pub use config::{EngineOptions, FakeRootDetection, IsolationLevel, SessionOptions};
pub use coordinator::AutocommitCoordinator;
pub use database::Database;
pub use engine::{Bind, Connection, ConnectionTransaction, Dialect, Engine};
pub use error::{CoreError, CoreResult};
pub use events::SessionEvents;
pub use registry::{ConnectionSet, TransactionRegistry};
pub use session::{ScopedSession, Session, SessionFactory, SharedSession};
pub use types::{TransactionHandle, TransactionId};

pub use autocommit_driver::{DatabaseUrl, Driver, DriverConnection, HasAutocommitFlag, Write};
