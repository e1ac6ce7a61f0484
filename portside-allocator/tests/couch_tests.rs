use portside_allocator::{CouchStore, DocumentStore, SaveOutcome, StoreError};
use portside_document::AllocationDocument;
use portside_types::RevisionToken;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn couch(server: &MockServer) -> CouchStore {
    CouchStore::new(format!("{}/portside", server.uri())).unwrap()
}

// ── Construction ─────────────────────────────────────────────────

#[tokio::test]
async fn trailing_slash_is_normalized() {
    let store = CouchStore::new("http://127.0.0.1:5984/portside/").unwrap();
    assert_eq!(store.database_url(), "http://127.0.0.1:5984/portside");
}

// ── load ─────────────────────────────────────────────────────────

#[tokio::test]
async fn load_parses_document_and_revision() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/portside/development"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": "development",
            "_rev": "3-abc",
            "allocatedPorts": [3000, 3001],
            "services": {}
        })))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    let snapshot = store.load("development").await.unwrap().unwrap();
    assert_eq!(snapshot.revision().unwrap().as_str(), "3-abc");
    assert!(snapshot.body.is_allocated(3000));
    assert!(snapshot.body.is_allocated(3001));
    assert!(!snapshot.body.is_allocated(3002));
}

#[tokio::test]
async fn load_missing_document_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/portside/development"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "not_found",
            "reason": "missing"
        })))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    assert!(store.load("development").await.unwrap().is_none());
}

#[tokio::test]
async fn load_missing_database_is_distinct() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/portside/development"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "not_found",
            "reason": "Database does not exist."
        })))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    let err = store.load("development").await.unwrap_err();
    assert!(matches!(err, StoreError::DatabaseMissing));
}

#[tokio::test]
async fn load_surfaces_unexpected_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/portside/development"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    let err = store.load("development").await.unwrap_err();
    assert!(matches!(err, StoreError::Unexpected { status: 500, .. }));
}

// ── save ─────────────────────────────────────────────────────────

#[tokio::test]
async fn save_sends_revision_and_returns_new_one() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/portside/development"))
        .and(query_param("rev", "3-abc"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ok": true,
            "id": "development",
            "rev": "4-def"
        })))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    let mut body = AllocationDocument::new();
    body.claim(3000);

    let outcome = store
        .save("development", &body, Some(&RevisionToken::new("3-abc")))
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::Stored(RevisionToken::new("4-def")));
}

#[tokio::test]
async fn save_without_revision_creates() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/portside/development"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ok": true,
            "id": "development",
            "rev": "1-new"
        })))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    let outcome = store
        .save("development", &AllocationDocument::new(), None)
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::Stored(RevisionToken::new("1-new")));
}

#[tokio::test]
async fn save_conflict_maps_to_conflict_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/portside/development"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "conflict",
            "reason": "Document update conflict."
        })))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    let outcome = store
        .save(
            "development",
            &AllocationDocument::new(),
            Some(&RevisionToken::new("3-abc")),
        )
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::Conflict);
}

// ── create_database ──────────────────────────────────────────────

#[tokio::test]
async fn create_database_put_on_database_url() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/portside"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    store.create_database().await.unwrap();
}

#[tokio::test]
async fn create_database_tolerates_already_exists() {
    // 412 means another instance won the creation race.
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/portside"))
        .respond_with(ResponseTemplate::new(412).set_body_json(json!({
            "error": "file_exists",
            "reason": "The database could not be created, the file already exists."
        })))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    store.create_database().await.unwrap();
}

// ── watch ────────────────────────────────────────────────────────

#[tokio::test]
async fn watch_delivers_changed_documents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/portside/_changes"))
        .and(query_param("feed", "longpoll"))
        .and(query_param("include_docs", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {
                    "seq": "12-x",
                    "id": "production",
                    "changes": [{"rev": "2-other"}],
                    "doc": {"_id": "production", "_rev": "2-other", "allocatedPorts": [9000]}
                },
                {
                    "seq": "13-x",
                    "id": "development",
                    "changes": [{"rev": "5-xyz"}],
                    "doc": {"_id": "development", "_rev": "5-xyz", "allocatedPorts": [3000]}
                }
            ],
            "last_seq": "13-x"
        })))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    let mut feed = store.watch("development").await.unwrap();

    let snapshot = tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("feed timed out")
        .expect("feed closed");
    assert_eq!(snapshot.revision().unwrap().as_str(), "5-xyz");
    assert!(snapshot.body.is_allocated(3000));
    assert!(!snapshot.body.is_allocated(9000));
}

#[tokio::test]
async fn watch_starts_from_the_sequence_captured_at_open() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/portside"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "db_name": "portside",
            "update_seq": "42-abc"
        })))
        .mount(&server)
        .await;
    // A write that landed right after the sequence was captured must be
    // replayed: the first longpoll asks for everything since then.
    Mock::given(method("GET"))
        .and(path("/portside/_changes"))
        .and(query_param("since", "42-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {
                    "seq": "43-x",
                    "id": "development",
                    "changes": [{"rev": "1-abc"}],
                    "doc": {"_id": "development", "_rev": "1-abc", "allocatedPorts": [3005]}
                }
            ],
            "last_seq": "43-x"
        })))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    let mut feed = store.watch("development").await.unwrap();

    let snapshot = tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("feed timed out")
        .expect("feed closed");
    assert!(snapshot.body.is_allocated(3005));
}

#[tokio::test]
async fn watch_backs_off_on_malformed_feed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/portside/_changes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let store = couch(&server).await;
    let mut feed = store.watch("development").await.unwrap();

    assert!(tokio::time::timeout(Duration::from_millis(400), feed.recv())
        .await
        .is_err());

    // Two backoff steps fit in the window; a hot loop would pile up
    // hundreds of requests.
    let hits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/portside/_changes")
        .count();
    assert!(hits <= 3, "feed hot-looped: {hits} requests in 400ms");
}
