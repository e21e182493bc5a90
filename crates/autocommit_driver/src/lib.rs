//! # Autocommit Driver
//!
//! Driver connection adapter for the autocommit session workspace.
//!
//! This crate is the lowest layer: it describes what the session and
//! coordinator layers need from a database driver and nothing more.
//!
//! ## Design Principles
//!
//! - [`HasAutocommitFlag`] is the only capability the autocommit
//!   coordinator depends on
//! - [`DriverConnection`] follows DB-API semantics (implicit transaction
//!   begin when autocommit is off)
//! - Rows are opaque `(table, key) -> bytes`; there is no query language
//! - Connections must be `Send + Sync`
//!
//! ## Available Drivers
//!
//! - [`InMemoryDriver`] - For testing and ephemeral databases
//!
//! ## Example
//!
//! ```rust
//! use autocommit_driver::{DatabaseUrl, Driver, DriverParams, HasAutocommitFlag, InMemoryDriver};
//!
//! let driver = InMemoryDriver::new();
//! let url = DatabaseUrl::parse("memory://app").unwrap();
//! let conn = driver.connect(&url, &DriverParams::new()).unwrap();
//! conn.set_autocommit(true).unwrap();
//! assert!(conn.autocommit());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod memory;
mod url;

pub use connection::{ConnectionId, Driver, DriverConnection, DriverParams, HasAutocommitFlag, Write};
pub use error::{DriverError, DriverResult};
pub use memory::{InMemoryConnection, InMemoryDriver};
pub use url::DatabaseUrl;
