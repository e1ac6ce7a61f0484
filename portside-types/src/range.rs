//! Inclusive TCP port range configuration.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive `[min, max]` port range.
///
/// Immutable once constructed. Serializes as a two-element array
/// (`[3000, 4000]`), matching the document's configuration shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(u16, u16)", into = "(u16, u16)")]
pub struct PortRange {
    min: u16,
    max: u16,
}

impl PortRange {
    /// Creates a range after validating `min <= max`.
    pub fn new(min: u16, max: u16) -> Result<Self, Error> {
        if min > max {
            return Err(Error::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Lowest port in the range.
    #[must_use]
    pub const fn min(&self) -> u16 {
        self.min
    }

    /// Highest port in the range (inclusive).
    #[must_use]
    pub const fn max(&self) -> u16 {
        self.max
    }

    /// Number of ports covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    /// A range always covers at least one port.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if `port` falls inside the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }

    /// Iterates the range in ascending order. Scan order is part of the
    /// allocator contract (lowest free port first).
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.min..=self.max
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 3000,
            max: 4000,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

impl TryFrom<(u16, u16)> for PortRange {
    type Error = Error;

    fn try_from((min, max): (u16, u16)) -> Result<Self, Self::Error> {
        Self::new(min, max)
    }
}

impl From<PortRange> for (u16, u16) {
    fn from(range: PortRange) -> Self {
        (range.min, range.max)
    }
}
