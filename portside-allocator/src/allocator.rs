//! The allocation protocol orchestrator.
//!
//! `PortAllocator` runs the scan-and-probe loop against its cached view
//! of the shared document, commits claims through the sync channel, and
//! surfaces the event model. Operations on one instance are serialized by
//! an internal operation lock; cross-instance races are resolved by
//! merge convergence, not prevented (see the crate docs).

use crate::config::AllocatorConfig;
use crate::error::AllocResult;
use crate::events::{AllocatorEvent, DocumentChange, EventBus};
use crate::probe::{PortProbe, ProbeOutcome, TcpProbe};
use crate::store::{CouchStore, DocumentStore};
use crate::sync::{ChannelState, SyncChannel};
use portside_document::{AllocationDocument, ServiceRecord, VersionedDocument};
use portside_types::{HybridStamp, InstanceId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of one ascending scan.
struct ScanHit {
    /// First port that probed `Available`.
    port: u16,
    /// Ports discovered `Occupied` along the way; claimed opportunistically.
    occupied: Vec<u16>,
}

/// Connects to the store described by `config` and returns a ready
/// allocator: database created if absent (once), defaults populated,
/// change feed running.
pub async fn connect(config: AllocatorConfig) -> AllocResult<PortAllocator> {
    let store = Arc::new(CouchStore::new(&config.store_url)?);
    let probe = Arc::new(TcpProbe::new(Duration::from_millis(config.probe_timeout_ms)));
    PortAllocator::with_parts(config, store, probe).await
}

/// One running instance of the port allocator.
pub struct PortAllocator {
    config: AllocatorConfig,
    instance: InstanceId,
    channel: Arc<SyncChannel>,
    probe: Arc<dyn PortProbe>,
    events: Arc<EventBus>,
    /// Serializes find/allocate/release/associate within this instance,
    /// so two concurrent scans cannot both pick the same "first free"
    /// port locally.
    op_lock: Mutex<()>,
    merge_task: JoinHandle<()>,
}

impl PortAllocator {
    /// Dependency-injection constructor: any store and probe behind the
    /// boundary traits. Connects, populates defaults, spawns the merge
    /// task, and emits `Connected`.
    pub async fn with_parts(
        config: AllocatorConfig,
        store: Arc<dyn DocumentStore>,
        probe: Arc<dyn PortProbe>,
    ) -> AllocResult<Self> {
        Self::with_events(config, store, probe, Arc::new(EventBus::default())).await
    }

    /// Like `with_parts`, but over a caller-supplied event bus, so
    /// consumers can subscribe before construction and observe the
    /// `Connected` event itself.
    pub async fn with_events(
        config: AllocatorConfig,
        store: Arc<dyn DocumentStore>,
        probe: Arc<dyn PortProbe>,
        events: Arc<EventBus>,
    ) -> AllocResult<Self> {
        let channel = Arc::new(SyncChannel::new(
            store,
            config.env.clone(),
            config.publish_retry_limit,
        ));

        // The feed must be open before the initial load: a remote write
        // landing between the two is then replayed on the feed instead
        // of lost until some later unrelated write.
        let feed = channel.watch().await?;
        channel.connect().await?;

        let merge_task = tokio::spawn(run_merge_loop(channel.clone(), events.clone(), feed));

        let allocator = Self {
            config,
            instance: InstanceId::new(),
            channel,
            probe,
            events,
            op_lock: Mutex::new(()),
            merge_task,
        };

        allocator.events.emit(AllocatorEvent::Connected);
        info!(instance = %allocator.instance, env = %allocator.config.env, "allocator ready");
        Ok(allocator)
    }

    /// This instance's id.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    /// The configuration this instance runs with.
    #[must_use]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Current sync channel state.
    pub async fn channel_state(&self) -> ChannelState {
        self.channel.state().await
    }

    /// Subscribes to allocator events. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<AllocatorEvent> {
        self.events.subscribe()
    }

    /// A copy of the local document view.
    pub async fn document(&self) -> AllocationDocument {
        self.channel.snapshot().await.body
    }

    /// Whether `port` is allocated in the local view.
    pub async fn is_allocated(&self, port: u16) -> bool {
        self.channel.snapshot().await.body.is_allocated(port)
    }

    /// Scans the range ascending for the first available port, without
    /// claiming it.
    ///
    /// Ports already allocated in the local view are skipped without
    /// probing. Ports found `Occupied` are recorded in the local view
    /// (they are in use by *something*) but nothing is published — a
    /// preview never commits. Returns `None` and emits `full` when the
    /// range is exhausted.
    pub async fn find_available_port(&self) -> AllocResult<Option<u16>> {
        let _guard = self.op_lock.lock().await;
        match self.scan().await? {
            Some(hit) => Ok(Some(hit.port)),
            None => {
                self.events.emit(AllocatorEvent::RangeFull);
                Ok(None)
            }
        }
    }

    /// Finds, claims, and publishes the first available port.
    ///
    /// On success the claim (plus any occupied ports the scan observed)
    /// is committed to the store before the port is returned; a claim
    /// whose publish fails is not treated as committed. Returns `None`
    /// and emits `full` on range exhaustion.
    pub async fn allocate(&self) -> AllocResult<Option<u16>> {
        let _guard = self.op_lock.lock().await;

        let Some(hit) = self.scan().await? else {
            info!(range = %self.config.port_range, "port range exhausted");
            self.events.emit(AllocatorEvent::RangeFull);
            return Ok(None);
        };

        let port = hit.port;
        let occupied = hit.occupied;
        self.channel
            .publish_with(move |doc| {
                doc.claim(port);
                for p in &occupied {
                    doc.claim(*p);
                }
            })
            .await?;

        info!(port, "claimed port");
        self.events.emit(AllocatorEvent::Claimed {
            service: None,
            port,
        });
        Ok(Some(port))
    }

    /// Releases a claimed port and publishes the change. Releasing an
    /// unallocated port is a no-op that still publishes nothing new.
    pub async fn release(&self, port: u16) -> AllocResult<()> {
        let _guard = self.op_lock.lock().await;

        self.channel
            .publish_with(move |doc| {
                doc.release(port);
            })
            .await?;

        info!(port, "released port");
        self.events.emit(AllocatorEvent::Released {
            service: None,
            port,
        });
        Ok(())
    }

    /// Binds a service name to a port and publishes the change. Does not
    /// claim the port — callers allocate first.
    pub async fn associate(&self, name: impl Into<String>, port: u16) -> AllocResult<()> {
        let _guard = self.op_lock.lock().await;
        let name = name.into();

        // Stamp past any record we already know about, so the local
        // write wins the LWW comparison against our own view.
        let stamp = match self.channel.snapshot().await.body.service_record(&name) {
            Some(existing) => existing.stamp.tick(),
            None => HybridStamp::now(),
        };
        let record = ServiceRecord {
            port,
            stamp,
            instance: self.instance,
        };

        let publish_name = name.clone();
        self.channel
            .publish_with(move |doc| {
                doc.associate(publish_name.clone(), record.clone());
            })
            .await?;

        debug!(service = %name, port, "associated service");
        Ok(())
    }

    /// Ascending scan of the configured range against the local view.
    async fn scan(&self) -> AllocResult<Option<ScanHit>> {
        let view = self.channel.snapshot().await.body;
        let mut occupied = Vec::new();

        for port in self.config.port_range.iter() {
            if view.is_allocated(port) || occupied.contains(&port) {
                continue;
            }
            match self.probe.probe(port).await? {
                ProbeOutcome::Occupied => {
                    debug!(port, "probe found foreign listener, recording claim");
                    occupied.push(port);
                }
                ProbeOutcome::Available => {
                    self.record_occupied(&occupied).await;
                    return Ok(Some(ScanHit { port, occupied }));
                }
            }
        }

        self.record_occupied(&occupied).await;
        Ok(None)
    }

    /// Records occupied-port discoveries in the local view only; the
    /// next publish carries them upstream.
    async fn record_occupied(&self, occupied: &[u16]) {
        if occupied.is_empty() {
            return;
        }
        let ports = occupied.to_vec();
        self.channel
            .apply_local(move |doc| {
                for port in ports {
                    doc.claim(port);
                }
            })
            .await;
    }
}

impl Drop for PortAllocator {
    fn drop(&mut self) {
        self.merge_task.abort();
    }
}

/// Consumes the change feed, merges remote snapshots into the local
/// view, and emits `change.*` events. Reconnects with bounded backoff
/// when the feed dies; an unrecoverable failure emits `error` and ends
/// the task.
async fn run_merge_loop(
    channel: Arc<SyncChannel>,
    events: Arc<EventBus>,
    mut feed: mpsc::Receiver<VersionedDocument>,
) {
    loop {
        while let Some(remote) = feed.recv().await {
            let delta = channel.merge_remote(remote).await;
            if delta.is_empty() {
                continue;
            }

            let view = channel.snapshot().await.body;
            if delta.allocated_ports {
                events.emit(AllocatorEvent::Changed(DocumentChange::AllocatedPorts(
                    view.allocated_ports().collect(),
                )));
            }
            if delta.services {
                events.emit(AllocatorEvent::Changed(DocumentChange::Services(
                    view.services()
                        .map(|(name, record)| (name.to_string(), record.port))
                        .collect(),
                )));
            }
        }

        debug!("change feed ended, reconnecting");
        // Re-open the feed before re-loading, for the same reason the
        // constructor does.
        feed = match channel.watch().await {
            Ok(feed) => feed,
            Err(e) => {
                warn!("failed to re-open change feed: {e}");
                events.emit(AllocatorEvent::StoreError {
                    message: e.to_string(),
                });
                return;
            }
        };
        if let Err(e) = channel.reconnect().await {
            warn!("reconnect gave up: {e}");
            events.emit(AllocatorEvent::StoreError {
                message: e.to_string(),
            });
            return;
        }
    }
}
