//! CouchDB-flavoured document store client.
//!
//! Speaks the subset of the CouchDB HTTP API the allocator needs:
//! GET/PUT of a single document with `_rev`-based optimistic concurrency,
//! database creation, and the `_changes` longpoll feed for remote
//! notifications.

use super::{DocumentStore, SaveOutcome, StoreError, StoreResult};
use async_trait::async_trait;
use portside_document::{AllocationDocument, VersionedDocument};
use portside_types::RevisionToken;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Server-side longpoll timeout (ms); kept under the client timeout so a
/// quiet feed returns an empty result instead of a client error.
const LONGPOLL_TIMEOUT_MS: u64 = 55_000;

/// Delay cap between change-feed retries after a transport error.
const FEED_RETRY_CAP: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct CouchDocument {
    #[serde(rename = "_rev")]
    rev: String,
    #[serde(flatten)]
    body: AllocationDocument,
}

#[derive(Debug, Deserialize)]
struct CouchErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct CouchWriteResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    #[serde(default)]
    results: Vec<ChangeRow>,
    last_seq: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChangeRow {
    id: String,
    doc: Option<CouchDocument>,
}

#[derive(Debug, Deserialize)]
struct DatabaseInfo {
    update_seq: serde_json::Value,
}

/// CouchDB-style store client for one database.
#[derive(Debug, Clone)]
pub struct CouchStore {
    /// Full database URL, e.g. `http://127.0.0.1:5984/portside`.
    database_url: String,
    client: Client,
}

impl CouchStore {
    /// Creates a client for the database at `database_url`.
    pub fn new(database_url: impl Into<String>) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StoreError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            database_url: database_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// The database URL this client talks to.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn document_url(&self, name: &str) -> String {
        format!("{}/{}", self.database_url, name)
    }

    /// Reads the database's current update sequence, if reachable.
    async fn current_seq(&self) -> Option<String> {
        let response = self
            .client
            .get(self.database_url.as_str())
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let info: DatabaseInfo = response.json().await.ok()?;
        Some(match info.update_seq {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Distinguishes "document missing" from "database missing" in a 404
    /// body. CouchDB reports an absent database as `no_db_file` (or a
    /// "Database does not exist." reason).
    fn classify_not_found(body: &str) -> StoreError {
        match serde_json::from_str::<CouchErrorBody>(body) {
            Ok(err)
                if err.reason.contains("no_db_file")
                    || err.reason.contains("Database does not exist")
                    || err.error == "no_db_file" =>
            {
                StoreError::DatabaseMissing
            }
            _ => StoreError::Unexpected {
                status: 404,
                body: body.to_string(),
            },
        }
    }
}

#[async_trait]
impl DocumentStore for CouchStore {
    async fn load(&self, name: &str) -> StoreResult<Option<VersionedDocument>> {
        let response = self
            .client
            .get(self.document_url(name))
            .send()
            .await
            .map_err(|e| StoreError::Http(format!("load failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let doc: CouchDocument = response
                    .json()
                    .await
                    .map_err(|e| StoreError::Http(format!("failed to parse document: {e}")))?;
                debug!(name, rev = %doc.rev, "loaded document");
                Ok(Some(VersionedDocument::new(
                    doc.body,
                    RevisionToken::new(doc.rev),
                )))
            }
            StatusCode::NOT_FOUND => {
                let body = response.text().await.unwrap_or_default();
                match Self::classify_not_found(&body) {
                    StoreError::Unexpected { .. } => Ok(None),
                    missing => Err(missing),
                }
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::Unexpected {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn save(
        &self,
        name: &str,
        body: &AllocationDocument,
        prior: Option<&RevisionToken>,
    ) -> StoreResult<SaveOutcome> {
        let mut request = self.client.put(self.document_url(name)).json(body);
        if let Some(rev) = prior {
            request = request.query(&[("rev", rev.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Http(format!("save failed: {e}")))?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::ACCEPTED => {
                let written: CouchWriteResponse = response
                    .json()
                    .await
                    .map_err(|e| StoreError::Http(format!("failed to parse write response: {e}")))?;
                debug!(name, rev = %written.rev, "stored document");
                Ok(SaveOutcome::Stored(RevisionToken::new(written.rev)))
            }
            StatusCode::CONFLICT => Ok(SaveOutcome::Conflict),
            StatusCode::NOT_FOUND => {
                let body = response.text().await.unwrap_or_default();
                Err(Self::classify_not_found(&body))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::Unexpected {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn create_database(&self) -> StoreResult<()> {
        let response = self
            .client
            .put(&self.database_url)
            .send()
            .await
            .map_err(|e| StoreError::Http(format!("database creation failed: {e}")))?;

        match response.status() {
            // 412 means someone else created it first, which is fine.
            StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::PRECONDITION_FAILED => {
                info!(url = %self.database_url, "database ready");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::Unexpected {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn watch(&self, name: &str) -> StoreResult<mpsc::Receiver<VersionedDocument>> {
        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        let name = name.to_string();

        // The sequence is captured before this call returns, so a write
        // landing between `watch` and the caller's initial load is still
        // replayed on the feed. Falling back to `0` replays history,
        // which the union merge absorbs.
        let initial_seq = self.current_seq().await.unwrap_or_else(|| "0".to_string());

        tokio::spawn(async move {
            let mut since = initial_seq;
            let mut retry_delay = Duration::from_millis(200);
            let longpoll_timeout = LONGPOLL_TIMEOUT_MS.to_string();

            loop {
                let url = format!("{}/_changes", store.database_url);
                let request = store
                    .client
                    .get(&url)
                    .query(&[
                        ("feed", "longpoll"),
                        ("include_docs", "true"),
                        ("since", since.as_str()),
                        ("timeout", longpoll_timeout.as_str()),
                    ])
                    .send()
                    .await;

                let response = match request {
                    Ok(r) if r.status().is_success() => r,
                    Ok(r) => {
                        warn!(status = %r.status(), "change feed request rejected");
                        tokio::time::sleep(retry_delay).await;
                        retry_delay = (retry_delay * 2).min(FEED_RETRY_CAP);
                        continue;
                    }
                    Err(e) => {
                        warn!("change feed request failed: {e}");
                        tokio::time::sleep(retry_delay).await;
                        retry_delay = (retry_delay * 2).min(FEED_RETRY_CAP);
                        continue;
                    }
                };

                let changes: ChangesResponse = match response.json().await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("failed to parse change feed: {e}");
                        tokio::time::sleep(retry_delay).await;
                        retry_delay = (retry_delay * 2).min(FEED_RETRY_CAP);
                        continue;
                    }
                };
                retry_delay = Duration::from_millis(200);

                // CouchDB sequence tokens are opaque; round-trip verbatim.
                since = match &changes.last_seq {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };

                for row in changes.results {
                    if row.id != name {
                        continue;
                    }
                    let Some(doc) = row.doc else { continue };
                    let snapshot =
                        VersionedDocument::new(doc.body, RevisionToken::new(doc.rev));
                    if tx.send(snapshot).await.is_err() {
                        debug!(name, "change feed receiver dropped, stopping watch");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
