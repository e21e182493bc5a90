//! # Autocommit Testkit
//!
//! Test utilities for autocommit sessions.
//!
//! This crate provides:
//! - Fixtures that wrap every test in a transaction rolled back on drop
//! - Property-based test generators using proptest
//! - Tracing setup for test output
//!
//! ## Usage
//!
//! ```rust,ignore
//! use autocommit_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_session() {
//!     let fixtures = my_fixtures();
//!     with_db_session(&fixtures, |session| {
//!         session.put("users", "1", b"ada".to_vec());
//!         session.commit().unwrap();
//!     })
//!     .unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
}

pub use error::*;
pub use fixtures::*;
pub use generators::*;

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber for test output, filtered by `RUST_LOG`
/// (default `warn`).
///
/// Safe to call from every test; only the first call takes effect.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
