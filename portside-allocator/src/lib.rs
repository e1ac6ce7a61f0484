//! Replicated TCP port allocator.
//!
//! Portside hands out TCP ports to local services and keeps allocation
//! state consistent across cooperating instances that share one
//! replicated configuration document (a CouchDB-style store by default).
//!
//! # Architecture
//!
//! - **Probe**: transient bind-and-close test of local port availability
//! - **Store**: revisioned document store boundary with change feeds
//! - **SyncChannel**: connect, optimistic publish, merge, reconnect
//! - **PortAllocator**: the scan/probe/claim protocol and event surface
//!
//! # The allocation protocol
//!
//! `allocate` scans the configured range ascending (lowest free port
//! first — this ordering is a contract), skipping ports the local view
//! already marks allocated. Unknown ports are probed; an occupied port is
//! opportunistically recorded as allocated and the scan continues. The
//! first available port is claimed, the claim is published with
//! optimistic concurrency, and a `claim` event fires.
//!
//! # Consistency model
//!
//! Best-effort eventual consistency — no consensus, no locks. Two
//! instances may claim the same port concurrently before either publish
//! propagates; the union merge guarantees the document converges to a
//! single claim, one instance wins the physical bind, and the other
//! observes `Occupied` on its own probe or sees the claim arrive on the
//! change feed. Implementers must not assume at-most-one-claimant across
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use portside_allocator::{connect, AllocatorConfig};
//!
//! # async fn run() -> portside_allocator::AllocResult<()> {
//! let allocator = connect(AllocatorConfig::default()).await?;
//! if let Some(port) = allocator.allocate().await? {
//!     allocator.associate("web", port).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod allocator;
mod config;
mod error;
mod events;
pub mod probe;
pub mod store;
mod sync;

pub use allocator::{connect, PortAllocator};
pub use config::{AllocatorConfig, ENV_VAR};
pub use error::{AllocError, AllocResult};
pub use events::{AllocatorEvent, DocumentChange, DocumentField, EventBus};
pub use probe::{PortProbe, ProbeOutcome, TcpProbe};
pub use store::{CouchStore, DocumentStore, SaveOutcome, StoreError, StoreResult};
pub use sync::{ChannelState, SyncChannel};
