//! Document store abstraction.
//!
//! The shared allocation document lives in a revisioned key/value
//! document store with change notifications. This module defines the
//! boundary trait plus two implementations: `CouchStore` (CouchDB-style
//! HTTP) and `mock::MemoryStore` (in-process, for tests and embedding).

mod couch;

pub use couch::CouchStore;

use async_trait::async_trait;
use portside_document::{AllocationDocument, VersionedDocument};
use portside_types::RevisionToken;
use thiserror::Error;
use tokio::sync::mpsc;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Transport-level store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// The database itself does not exist (distinct from a missing
    /// document — the connect path creates the database exactly once).
    #[error("database missing")]
    DatabaseMissing,

    /// The store answered with a status this client does not handle.
    #[error("unexpected status {status}: {body}")]
    Unexpected { status: u16, body: String },
}

/// Outcome of an optimistic-concurrency write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The write landed; here is the new revision.
    Stored(RevisionToken),
    /// The remote revision advanced since the snapshot was read; the
    /// caller must re-fetch, re-apply, and retry.
    Conflict,
}

/// A revisioned key/value document store with change notifications.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Loads a document by name. `Ok(None)` means the document does not
    /// exist yet; a missing *database* is `StoreError::DatabaseMissing`.
    async fn load(&self, name: &str) -> StoreResult<Option<VersionedDocument>>;

    /// Writes a document using optimistic concurrency. `prior` is the
    /// revision the caller read the document at (`None` on first write).
    async fn save(
        &self,
        name: &str,
        body: &AllocationDocument,
        prior: Option<&RevisionToken>,
    ) -> StoreResult<SaveOutcome>;

    /// Creates the backing database. Used by the create-then-retry path
    /// when `load` reports `DatabaseMissing`.
    async fn create_database(&self) -> StoreResult<()>;

    /// Opens a change feed for a document. Every remote write produces a
    /// new snapshot on the receiver; the feed ends when the store side
    /// shuts down or the receiver is dropped.
    async fn watch(&self, name: &str) -> StoreResult<mpsc::Receiver<VersionedDocument>>;
}

/// In-process store for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast;

    #[derive(Debug, Default)]
    struct Inner {
        documents: HashMap<String, (AllocationDocument, u64)>,
        database_exists: bool,
    }

    /// A shared in-memory document store with integer revisions.
    ///
    /// Clones share state, so two allocator instances constructed over
    /// clones of one `MemoryStore` behave like two processes attached to
    /// the same database — including conflict detection and the change
    /// feed.
    #[derive(Debug, Clone)]
    pub struct MemoryStore {
        inner: Arc<Mutex<Inner>>,
        changes: broadcast::Sender<(String, VersionedDocument)>,
        always_conflict: Arc<AtomicBool>,
    }

    impl MemoryStore {
        /// Creates a store whose database already exists.
        #[must_use]
        pub fn new() -> Self {
            let (changes, _) = broadcast::channel(64);
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    documents: HashMap::new(),
                    database_exists: true,
                })),
                changes,
                always_conflict: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Creates a store whose database must first be created, to
        /// exercise the create-then-retry connect path.
        #[must_use]
        pub fn without_database() -> Self {
            let store = Self::new();
            store.inner.lock().unwrap().database_exists = false;
            store
        }

        /// Forces every subsequent save to report a conflict.
        pub fn set_always_conflict(&self, conflict: bool) {
            self.always_conflict.store(conflict, Ordering::SeqCst);
        }

        fn revision(seq: u64) -> RevisionToken {
            RevisionToken::new(format!("{seq}-mem"))
        }

        fn parse_seq(rev: &RevisionToken) -> u64 {
            rev.as_str()
                .split('-')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        }
    }

    impl Default for MemoryStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        async fn load(&self, name: &str) -> StoreResult<Option<VersionedDocument>> {
            let inner = self.inner.lock().unwrap();
            if !inner.database_exists {
                return Err(StoreError::DatabaseMissing);
            }
            Ok(inner.documents.get(name).map(|(body, seq)| {
                VersionedDocument::new(body.clone(), Self::revision(*seq))
            }))
        }

        async fn save(
            &self,
            name: &str,
            body: &AllocationDocument,
            prior: Option<&RevisionToken>,
        ) -> StoreResult<SaveOutcome> {
            if self.always_conflict.load(Ordering::SeqCst) {
                return Ok(SaveOutcome::Conflict);
            }

            let revision = {
                let mut inner = self.inner.lock().unwrap();
                if !inner.database_exists {
                    return Err(StoreError::DatabaseMissing);
                }

                let current_seq = inner.documents.get(name).map(|(_, seq)| *seq);
                let prior_seq = prior.map(Self::parse_seq);
                if current_seq != prior_seq {
                    return Ok(SaveOutcome::Conflict);
                }

                let next_seq = current_seq.unwrap_or(0) + 1;
                inner
                    .documents
                    .insert(name.to_string(), (body.clone(), next_seq));
                Self::revision(next_seq)
            };

            let snapshot = VersionedDocument::new(body.clone(), revision.clone());
            let _ = self.changes.send((name.to_string(), snapshot));
            Ok(SaveOutcome::Stored(revision))
        }

        async fn create_database(&self) -> StoreResult<()> {
            self.inner.lock().unwrap().database_exists = true;
            Ok(())
        }

        async fn watch(&self, name: &str) -> StoreResult<mpsc::Receiver<VersionedDocument>> {
            let mut feed = self.changes.subscribe();
            let (tx, rx) = mpsc::channel(16);
            let name = name.to_string();
            tokio::spawn(async move {
                loop {
                    match feed.recv().await {
                        Ok((doc_name, snapshot)) if doc_name == name => {
                            if tx.send(snapshot).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(rx)
        }
    }
}
