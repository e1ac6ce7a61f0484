//! The replicated allocation document.
//!
//! `AllocationDocument` is the single piece of shared mutable state in
//! Portside: the set of claimed ports plus the service-name → port map.
//! Every instance holds a local copy and converges with its peers through
//! `merge`:
//!
//! - **Ports** merge by union: a port claimed anywhere is claimed
//!   everywhere. A remote claim is never silently dropped.
//! - **Services** merge per key, last-writer-wins: the record with the
//!   higher hybrid stamp wins, ties broken by the writer's instance id.
//!
//! `VersionedDocument` pairs a document snapshot with the store's opaque
//! revision token. Snapshots are passed by value between the allocator
//! and the sync channel; mutation always produces a new snapshot plus an
//! explicit publish, never in-place shared mutation.

mod document;
mod versioned;

pub use document::{AllocationDocument, DocumentDelta, ServiceRecord};
pub use versioned::VersionedDocument;
