//! Allocation state: claimed ports and service associations.

use portside_types::{HybridStamp, InstanceId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One service-name → port binding with last-writer-wins metadata.
///
/// Concurrent writes to the same name are resolved by comparing
/// `(stamp, instance)`; the higher pair wins. The instance id tiebreak is
/// arbitrary but deterministic, so all replicas converge on the same
/// winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// The bound port.
    pub port: u16,
    /// Stamp of the write that produced this record.
    pub stamp: HybridStamp,
    /// Instance that performed the write.
    pub instance: InstanceId,
}

impl ServiceRecord {
    /// Creates a record stamped now by the given instance.
    #[must_use]
    pub fn new(port: u16, instance: InstanceId) -> Self {
        Self {
            port,
            stamp: HybridStamp::now(),
            instance,
        }
    }

    /// True if an incoming record should replace this one.
    fn loses_to(&self, other: &Self) -> bool {
        (other.stamp, other.instance) > (self.stamp, self.instance)
    }
}

/// Which document fields a merge changed. Drives the fine-grained
/// `change.*` events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentDelta {
    /// The claimed-port set gained entries.
    pub allocated_ports: bool,
    /// At least one service mapping was added or replaced.
    pub services: bool,
}

impl DocumentDelta {
    /// True if the merge changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.allocated_ports && !self.services
    }
}

/// The shared allocation document.
///
/// Claims are a true set: idempotent, hole-free, ordered. The ordering
/// matters — the allocator's ascending scan iterates `allocated_ports`
/// implicitly through membership tests, and the serialized form is a
/// sorted array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AllocationDocument {
    allocated_ports: BTreeSet<u16>,
    services: BTreeMap<String, ServiceRecord>,
}

impl AllocationDocument {
    /// Creates an empty document (the default population written on first
    /// connect).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership test against the claimed-port set.
    #[must_use]
    pub fn is_allocated(&self, port: u16) -> bool {
        self.allocated_ports.contains(&port)
    }

    /// Claims a port. Idempotent: returns true only if the port was not
    /// already claimed.
    pub fn claim(&mut self, port: u16) -> bool {
        self.allocated_ports.insert(port)
    }

    /// Releases a port. Removing an absent port is a no-op; returns true
    /// only if the port was actually claimed.
    pub fn release(&mut self, port: u16) -> bool {
        self.allocated_ports.remove(&port)
    }

    /// Binds `name` to `port`, overwriting any prior mapping for the
    /// name. Does not claim the port — callers claim first, keeping the
    /// services-subset-of-ports invariant soft but reconcilable.
    pub fn associate(&mut self, name: impl Into<String>, record: ServiceRecord) {
        self.services.insert(name.into(), record);
    }

    /// Port currently bound to `name`, if any.
    #[must_use]
    pub fn service_port(&self, name: &str) -> Option<u16> {
        self.services.get(name).map(|r| r.port)
    }

    /// The full service record for `name`.
    #[must_use]
    pub fn service_record(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.get(name)
    }

    /// Iterates claimed ports in ascending order.
    pub fn allocated_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.allocated_ports.iter().copied()
    }

    /// Number of claimed ports.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated_ports.len()
    }

    /// Iterates service bindings.
    pub fn services(&self) -> impl Iterator<Item = (&str, &ServiceRecord)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reconciles a remotely observed document into this one.
    ///
    /// Ports merge by union — claims survive, whichever side made them.
    /// Services merge per key with last-writer-wins. Returns which fields
    /// changed so the caller can raise `change.*` notifications.
    pub fn merge(&mut self, remote: &AllocationDocument) -> DocumentDelta {
        let mut delta = DocumentDelta::default();

        for port in &remote.allocated_ports {
            if self.allocated_ports.insert(*port) {
                delta.allocated_ports = true;
            }
        }

        for (name, theirs) in &remote.services {
            let theirs_wins = match self.services.get(name) {
                Some(ours) => ours.loses_to(theirs),
                None => true,
            };
            if theirs_wins {
                self.services.insert(name.clone(), theirs.clone());
                delta.services = true;
            }
        }

        delta
    }
}
