//! Error types for the allocator.

use crate::store::StoreError;
use thiserror::Error;

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors that can occur in allocation operations.
///
/// A full port range is not an error — `find_available_port` and
/// `allocate` return `Ok(None)` for that outcome.
#[derive(Debug, Error)]
pub enum AllocError {
    /// A probe failed for a reason other than "port in use".
    #[error("probe failed on port {port}: {source}")]
    Probe {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A probe did not resolve within its bound.
    #[error("probe timed out on port {port}")]
    ProbeTimeout { port: u16 },

    /// Initial connection to the shared document failed, including the
    /// single create-then-retry cycle.
    #[error("store connection failed: {0}")]
    StoreConnect(String),

    /// An optimistic-concurrency write kept losing to remote writers.
    #[error("publish conflict persisted after {attempts} attempts")]
    PublishConflict { attempts: u32 },

    /// Transport-level store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
