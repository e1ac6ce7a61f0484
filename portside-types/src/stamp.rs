//! Hybrid Logical Clock stamps for write ordering.
//!
//! Combines physical time with a logical counter so that stamps are
//! monotonic on one instance even when the system clock stalls, and
//! totally ordered across instances (ties broken by the writer's
//! instance id at the point of use).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Hybrid Logical Clock stamp.
///
/// - `wall_time`: milliseconds since Unix epoch (physical component)
/// - `logical`: counter for stamps issued at the same wall time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridStamp {
    wall_time: u64,
    logical: u32,
}

impl HybridStamp {
    /// Creates a stamp at the current time.
    #[must_use]
    pub fn now() -> Self {
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_millis() as u64;

        Self {
            wall_time,
            logical: 0,
        }
    }

    /// Creates a stamp from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Returns the wall time component.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Generates the next stamp, strictly greater than `self` even when
    /// the system clock has not advanced.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_millis() as u64;

        if now > self.wall_time {
            Self {
                wall_time: now,
                logical: 0,
            }
        } else {
            Self {
                wall_time: self.wall_time,
                logical: self.logical.saturating_add(1),
            }
        }
    }
}

impl PartialOrd for HybridStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_time
            .cmp(&other.wall_time)
            .then(self.logical.cmp(&other.logical))
    }
}
