//! Core type definitions for Portside.
//!
//! This crate defines the fundamental types shared by the document and
//! allocator crates:
//! - Instance identifiers (UUID v7)
//! - Hybrid Logical Clock stamps for last-writer-wins ordering
//! - Inclusive port ranges
//! - Opaque store revision tokens
//!
//! Everything store-specific (HTTP shapes, change feeds) belongs in
//! `portside-allocator`, not here.

mod ids;
mod range;
mod revision;
mod stamp;

pub use ids::InstanceId;
pub use range::PortRange;
pub use revision::RevisionToken;
pub use stamp::HybridStamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid port range: min {min} exceeds max {max}")]
    InvalidRange { min: u16, max: u16 },
}
