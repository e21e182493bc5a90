//! Database URL parsing.

use crate::error::{DriverError, DriverResult};
use std::fmt;
use std::str::FromStr;

/// A parsed `scheme://location` database URL.
///
/// Only the parts drivers are routed by are interpreted: the scheme and the
/// database name (the last path segment). Everything else is passed to the
/// driver verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUrl {
    raw: String,
    scheme_end: usize,
}

impl DatabaseUrl {
    /// Parses a database URL.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidUrl`] if the URL has no `://` separator
    /// or an empty or malformed scheme.
    pub fn parse(url: &str) -> DriverResult<Self> {
        let Some(scheme_end) = url.find("://") else {
            return Err(DriverError::invalid_url(url, "missing `://` separator"));
        };

        let scheme = &url[..scheme_end];
        if scheme.is_empty() {
            return Err(DriverError::invalid_url(url, "empty scheme"));
        }
        let valid = scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid || !scheme.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(DriverError::invalid_url(url, "malformed scheme"));
        }

        Ok(Self {
            raw: url.to_string(),
            scheme_end,
        })
    }

    /// Returns the full URL as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the scheme, e.g. `postgresql` or `memory`.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_end]
    }

    /// Returns everything after `://`.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.raw[self.scheme_end + 3..]
    }

    /// Returns the database name.
    ///
    /// This is the last path segment (`postgresql://host/app` → `app`), or
    /// the whole location when there is no path (`memory://app` → `app`).
    /// Query strings are ignored.
    #[must_use]
    pub fn database_name(&self) -> &str {
        let location = self.location();
        let location = location.split('?').next().unwrap_or(location);
        match location.rfind('/') {
            Some(idx) => &location[idx + 1..],
            None => location,
        }
    }

    /// Returns the URL with any password replaced by `***`.
    #[must_use]
    pub fn redacted(&self) -> String {
        let location = self.location();
        let authority_end = location.find('/').unwrap_or(location.len());
        let authority = &location[..authority_end];

        if let Some(at) = authority.rfind('@') {
            let userinfo = &authority[..at];
            if let Some(colon) = userinfo.find(':') {
                return format!(
                    "{}://{}:***{}",
                    self.scheme(),
                    &userinfo[..colon],
                    &location[at..]
                );
            }
        }
        self.raw.clone()
    }
}

impl FromStr for DatabaseUrl {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
