//! TCP port probing.
//!
//! A probe is a transient bind-and-close on `0.0.0.0:<port>`: bind
//! success means the port is locally available, `AddrInUse` means
//! something already listens there. The bind transiently occupies the OS
//! port namespace, so two processes on the same host probing the same
//! port can race each other — an inherent limitation; the allocation
//! protocol answers it with convergence, not prevention.

use crate::error::{AllocError, AllocResult};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::debug;

/// Outcome of probing a single port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The bind succeeded; the port is locally free.
    Available,
    /// The port is in use by something (not necessarily through Portside).
    Occupied,
}

/// Boundary capability for testing local port availability.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Probes a single port. `Occupied` is a normal outcome; an error is
    /// any other bind failure (permission, invalid address, timeout).
    async fn probe(&self, port: u16) -> AllocResult<ProbeOutcome>;
}

/// The real probe: binds a listener on all interfaces and drops it.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// Creates a probe whose bind attempts are bounded by `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn probe(&self, port: u16) -> AllocResult<ProbeOutcome> {
        let bind = TcpListener::bind(("0.0.0.0", port));
        match tokio::time::timeout(self.timeout, bind).await {
            Err(_) => Err(AllocError::ProbeTimeout { port }),
            Ok(Ok(listener)) => {
                // Close immediately; the probe only tests availability.
                drop(listener);
                debug!(port, "probe: available");
                Ok(ProbeOutcome::Available)
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!(port, "probe: occupied");
                Ok(ProbeOutcome::Occupied)
            }
            Ok(Err(e)) => Err(AllocError::Probe { port, source: e }),
        }
    }
}

/// Scripted probes for tests.
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// A probe whose answers are scripted per port.
    ///
    /// Unlisted ports are `Available`. Records every probed port so tests
    /// can assert on scan order and skip behavior.
    #[derive(Debug, Default)]
    pub struct ScriptedProbe {
        occupied: Mutex<HashSet<u16>>,
        failing: Mutex<HashSet<u16>>,
        probed: Mutex<Vec<u16>>,
    }

    impl ScriptedProbe {
        /// Creates a probe that reports every port available.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Marks a port occupied.
        pub fn occupy(&self, port: u16) {
            self.occupied.lock().unwrap().insert(port);
        }

        /// Clears an occupied mark.
        pub fn vacate(&self, port: u16) {
            self.occupied.lock().unwrap().remove(&port);
        }

        /// Makes probing a port fail with a permission error.
        pub fn fail(&self, port: u16) {
            self.failing.lock().unwrap().insert(port);
        }

        /// Ports probed so far, in order.
        pub fn probed(&self) -> Vec<u16> {
            self.probed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PortProbe for ScriptedProbe {
        async fn probe(&self, port: u16) -> AllocResult<ProbeOutcome> {
            self.probed.lock().unwrap().push(port);
            if self.failing.lock().unwrap().contains(&port) {
                return Err(AllocError::Probe {
                    port,
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "scripted failure"),
                });
            }
            if self.occupied.lock().unwrap().contains(&port) {
                Ok(ProbeOutcome::Occupied)
            } else {
                Ok(ProbeOutcome::Available)
            }
        }
    }
}
