//! Synchronization channel to the shared document store.
//!
//! `SyncChannel` owns the instance's cached `VersionedDocument` and every
//! interaction with the store: the initial connect (with a single
//! create-then-retry cycle when the database is absent), optimistic
//! publishes with bounded conflict retry, the change feed, and reconnect
//! backoff. The allocator never touches the store directly.

use crate::error::{AllocError, AllocResult};
use crate::store::{DocumentStore, SaveOutcome, StoreError};
use portside_document::{AllocationDocument, DocumentDelta, VersionedDocument};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Reconnect attempts before giving up on a dropped feed.
const RECONNECT_ATTEMPTS: u32 = 5;

/// Cap on the reconnect backoff delay.
const RECONNECT_DELAY_CAP: Duration = Duration::from_secs(5);

/// Connection state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not attached; the initial state, and the terminal state after an
    /// unrecoverable connect failure.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Attached and idle.
    Connected,
    /// Attached, with a publish in flight.
    Syncing,
}

/// The live link between one allocator instance and the shared document.
pub struct SyncChannel {
    store: Arc<dyn DocumentStore>,
    /// Document name inside the database (the environment tag).
    document_name: String,
    /// Publish attempts before a conflict surfaces to the caller.
    retry_limit: u32,
    state: RwLock<ChannelState>,
    /// The instance's cached view of the shared document.
    current: RwLock<VersionedDocument>,
}

impl SyncChannel {
    /// Creates a disconnected channel for the named document.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        document_name: impl Into<String>,
        retry_limit: u32,
    ) -> Self {
        Self {
            store,
            document_name: document_name.into(),
            retry_limit: retry_limit.max(1),
            state: RwLock::new(ChannelState::Disconnected),
            current: RwLock::new(VersionedDocument::empty()),
        }
    }

    /// The document name this channel syncs.
    #[must_use]
    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    /// Current connection state.
    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// A copy of the cached document snapshot.
    pub async fn snapshot(&self) -> VersionedDocument {
        self.current.read().await.clone()
    }

    async fn set_state(&self, state: ChannelState) {
        *self.state.write().await = state;
    }

    /// Establishes the link and populates the cache.
    ///
    /// If the backing database does not exist, creates it and retries
    /// exactly once. If the document does not exist, writes empty
    /// defaults so every instance starts from the same shape. Any other
    /// failure surfaces as `StoreConnect` and leaves the channel
    /// disconnected.
    pub async fn connect(&self) -> AllocResult<VersionedDocument> {
        self.set_state(ChannelState::Connecting).await;

        let loaded = match self.store.load(&self.document_name).await {
            Ok(doc) => doc,
            Err(StoreError::DatabaseMissing) => {
                info!(document = %self.document_name, "database missing, creating");
                if let Err(e) = self.store.create_database().await {
                    self.set_state(ChannelState::Disconnected).await;
                    return Err(AllocError::StoreConnect(e.to_string()));
                }
                match self.store.load(&self.document_name).await {
                    Ok(doc) => doc,
                    Err(e) => {
                        self.set_state(ChannelState::Disconnected).await;
                        return Err(AllocError::StoreConnect(e.to_string()));
                    }
                }
            }
            Err(e) => {
                self.set_state(ChannelState::Disconnected).await;
                return Err(AllocError::StoreConnect(e.to_string()));
            }
        };

        let snapshot = match loaded {
            Some(snapshot) => snapshot,
            None => self.populate_defaults().await?,
        };

        *self.current.write().await = snapshot.clone();
        self.set_state(ChannelState::Connected).await;
        info!(document = %self.document_name, "connected to store");
        Ok(snapshot)
    }

    /// Writes the empty default document. Losing the write to another
    /// instance doing the same thing is fine — their defaults are ours.
    async fn populate_defaults(&self) -> AllocResult<VersionedDocument> {
        let body = AllocationDocument::new();
        match self.store.save(&self.document_name, &body, None).await {
            Ok(SaveOutcome::Stored(revision)) => {
                debug!(document = %self.document_name, "populated default document");
                Ok(VersionedDocument::new(body, revision))
            }
            Ok(SaveOutcome::Conflict) => match self.store.load(&self.document_name).await {
                Ok(Some(snapshot)) => Ok(snapshot),
                Ok(None) => {
                    self.set_state(ChannelState::Disconnected).await;
                    Err(AllocError::StoreConnect(
                        "document vanished during default population".to_string(),
                    ))
                }
                Err(e) => {
                    self.set_state(ChannelState::Disconnected).await;
                    Err(AllocError::StoreConnect(e.to_string()))
                }
            },
            Err(e) => {
                self.set_state(ChannelState::Disconnected).await;
                Err(AllocError::StoreConnect(e.to_string()))
            }
        }
    }

    /// Publishes a mutation with optimistic concurrency.
    ///
    /// Applies `mutate` to a copy of the cached snapshot and saves it at
    /// the cached revision. On a conflict the latest remote snapshot is
    /// re-fetched, adopted as the new base, and `mutate` is applied
    /// again — so the intended change is never lost to a lost race.
    /// Bounded by the channel's retry limit; exceeding it surfaces
    /// `PublishConflict` rather than silently dropping the change.
    pub async fn publish_with<F>(&self, mutate: F) -> AllocResult<VersionedDocument>
    where
        F: Fn(&mut AllocationDocument),
    {
        self.set_state(ChannelState::Syncing).await;

        // Hold the cache lock across the whole publish so a change-feed
        // merge cannot observe our own write before the cache reflects
        // it (which would look like a remote change).
        let mut current = self.current.write().await;
        let mut base = current.clone();
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            let mut body = base.body.clone();
            mutate(&mut body);

            let saved = self
                .store
                .save(&self.document_name, &body, base.revision())
                .await;

            match saved {
                Ok(SaveOutcome::Stored(revision)) => {
                    let updated = VersionedDocument::new(body, revision);
                    *current = updated.clone();
                    break Ok(updated);
                }
                Ok(SaveOutcome::Conflict) if attempts < self.retry_limit => {
                    warn!(
                        document = %self.document_name,
                        attempts, "publish conflict, re-fetching and retrying"
                    );
                    base = match self.store.load(&self.document_name).await {
                        Ok(Some(remote)) => remote,
                        Ok(None) => VersionedDocument::empty(),
                        Err(e) => break Err(AllocError::Store(e)),
                    };
                }
                Ok(SaveOutcome::Conflict) => {
                    break Err(AllocError::PublishConflict { attempts });
                }
                Err(e) => break Err(AllocError::Store(e)),
            }
        };

        self.set_state(ChannelState::Connected).await;
        outcome
    }

    /// Opens the store's change feed for this document.
    pub async fn watch(&self) -> AllocResult<mpsc::Receiver<VersionedDocument>> {
        Ok(self.store.watch(&self.document_name).await?)
    }

    /// Merges a remotely observed snapshot into the cached view.
    ///
    /// Ports union, services last-writer-wins. The remote revision is
    /// adopted only when the merge changed something (or no revision is
    /// cached yet): an echo of an older write carries nothing new, and
    /// adopting its revision would regress the cache behind a local
    /// publish and force a spurious conflict retry.
    pub async fn merge_remote(&self, remote: VersionedDocument) -> DocumentDelta {
        let mut current = self.current.write().await;
        let delta = current.body.merge(&remote.body);
        if !delta.is_empty() || current.revision.is_none() {
            current.revision = remote.revision;
        }
        if !delta.is_empty() {
            debug!(document = %self.document_name, ?delta, "merged remote snapshot");
        }
        delta
    }

    /// Applies a local-only mutation to the cached view without
    /// publishing. Used for opportunistic occupied-port recordings during
    /// a preview scan; the next publish re-applies durable state.
    pub async fn apply_local<F>(&self, mutate: F)
    where
        F: FnOnce(&mut AllocationDocument),
    {
        let mut current = self.current.write().await;
        mutate(&mut current.body);
    }

    /// Re-establishes the link after a transport-level disconnect, with
    /// capped exponential backoff. Bounded — never retries forever.
    pub async fn reconnect(&self) -> AllocResult<VersionedDocument> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.connect().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if attempt >= RECONNECT_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(attempt, "reconnect failed: {e}, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RECONNECT_DELAY_CAP);
                }
            }
        }
    }
}
