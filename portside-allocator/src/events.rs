//! Event surface for allocator consumers.
//!
//! The allocator *holds* an event bus rather than inheriting emitter
//! behavior; consumers call `subscribe()` and get a broadcast receiver.
//! Dropping the receiver unsubscribes. A slow consumer observes
//! `RecvError::Lagged` and never blocks the allocator.

use tokio::sync::broadcast;
use tracing::debug;

/// A document field that changed during a remote merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    /// The claimed-port set.
    AllocatedPorts,
    /// The service-name → port map.
    Services,
}

/// New value of a changed field, for consumers wanting fine-grained
/// reactivity without re-reading the whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentChange {
    /// New claimed-port set, ascending.
    AllocatedPorts(Vec<u16>),
    /// New service bindings, sorted by name.
    Services(Vec<(String, u16)>),
}

impl DocumentChange {
    /// The field this change applies to.
    #[must_use]
    pub fn field(&self) -> DocumentField {
        match self {
            DocumentChange::AllocatedPorts(_) => DocumentField::AllocatedPorts,
            DocumentChange::Services(_) => DocumentField::Services,
        }
    }
}

/// Events emitted by a `PortAllocator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorEvent {
    /// Attached to the store; defaults populated if the document was new.
    Connected,
    /// A port was claimed by a local `allocate`.
    Claimed {
        service: Option<String>,
        port: u16,
    },
    /// A port was released locally.
    Released {
        service: Option<String>,
        port: u16,
    },
    /// A scan exhausted the configured range.
    RangeFull,
    /// Unrecoverable store failure.
    StoreError { message: String },
    /// A remote merge changed a document field.
    Changed(DocumentChange),
}

/// Broadcast-backed event bus owned by the allocator.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<AllocatorEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Registers a new consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<AllocatorEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emits an event to all current subscribers. Events emitted with no
    /// subscribers are dropped.
    pub(crate) fn emit(&self, event: AllocatorEvent) {
        debug!(?event, "emitting allocator event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
