//! Opaque store revision tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque revision marker supplied by the document store.
///
/// Used for optimistic-concurrency writes: round-tripped verbatim, never
/// interpreted. CouchDB-style stores put a `"N-hash"` string here, but
/// nothing in Portside depends on that shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionToken(String);

impl RevisionToken {
    /// Wraps a raw revision string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw revision string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RevisionToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for RevisionToken {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}
