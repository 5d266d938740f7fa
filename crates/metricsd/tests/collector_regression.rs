//! Collector regression tests.
//!
//! Drives the full router (middleware included) with `oneshot` requests
//! against in-memory and file-snapshot stores.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use runmetrics_api::{ApiState, build_router};
use runmetrics_core::{MetricEnvelope, wire};
use runmetrics_store::{FileSnapshotStore, MemoryStore, MetricsStore, SharedStore};
use tower::ServiceExt;

fn memory_store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

fn router(store: &SharedStore) -> Router {
    build_router(ApiState::new(store.clone()))
}

async fn body_bytes(resp: Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_text(resp: Response) -> String {
    String::from_utf8(body_bytes(resp).await).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

// ── Positional updates ──────────────────────────────────────────

#[tokio::test]
async fn gauge_update_then_read() {
    let store = memory_store();
    let app = router(&store);

    let resp = app.clone().oneshot(post("/update/gauge/Alloc/123.45")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(get("/value/gauge/Alloc")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "123.45");
}

#[tokio::test]
async fn counter_updates_accumulate() {
    let store = memory_store();
    let app = router(&store);

    for _ in 0..2 {
        let resp = app.clone().oneshot(post("/update/counter/PollCount/1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app.oneshot(get("/value/counter/PollCount")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "2");
}

#[tokio::test]
async fn positional_update_errors() {
    let store = memory_store();
    let app = router(&store);

    let cases = [
        ("/update/histogram/x/1", StatusCode::BAD_REQUEST),
        ("/update/gauge/x/abc", StatusCode::BAD_REQUEST),
        ("/update/counter/x/1.5", StatusCode::BAD_REQUEST),
        ("/update/gauge/x", StatusCode::BAD_REQUEST),
        ("/update/gauge", StatusCode::NOT_FOUND),
        ("/update/gauge/", StatusCode::NOT_FOUND),
    ];
    for (uri, expected) in cases {
        let resp = app.clone().oneshot(post(uri)).await.unwrap();
        assert_eq!(resp.status(), expected, "{uri}");
    }
    assert!(store.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn value_read_errors() {
    let store = memory_store();
    let app = router(&store);

    let resp = app.clone().oneshot(get("/value/gauge/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app.oneshot(get("/value/summary/x")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── JSON updates ────────────────────────────────────────────────

#[tokio::test]
async fn json_update_echoes_stored_value() {
    let store = memory_store();
    store.add_counter("hits", 5).await.unwrap();
    let app = router(&store);

    let resp = app
        .oneshot(post_json("/update/", r#"{"id":"hits","type":"counter","delta":3}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let echoed: MetricEnvelope = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(echoed, MetricEnvelope::counter("hits", 8));
}

#[tokio::test]
async fn json_update_rejects_bad_requests() {
    let store = memory_store();
    let app = router(&store);

    // Wrong content type.
    let req = Request::builder()
        .method("POST")
        .uri("/update/")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(r#"{"id":"x","type":"gauge","value":1}"#))
        .unwrap();
    assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::BAD_REQUEST);

    for body in ["", "{not json", r#"{"id":"x","type":"gauge"}"#, r#"{"id":"x","type":"set","value":1}"#] {
        let resp = app.clone().oneshot(post_json("/update/", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body:?}");
    }
    assert!(store.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn json_value_lookup() {
    let store = memory_store();
    store.add_gauge("Sys", 4096.0).await.unwrap();
    let app = router(&store);

    let resp = app
        .clone()
        .oneshot(post_json("/value/", r#"{"id":"Sys","type":"gauge"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let found: MetricEnvelope = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(found, MetricEnvelope::gauge("Sys", 4096.0));

    let resp = app
        .oneshot(post_json("/value/", r#"{"id":"Sys","type":"counter"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Batches ─────────────────────────────────────────────────────

#[tokio::test]
async fn empty_batch_is_accepted_and_changes_nothing() {
    let store = memory_store();
    let app = router(&store);

    let resp = app.oneshot(post_json("/updates/", "[]")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "[]");
    assert!(store.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn gzip_batch_is_applied() {
    let store = memory_store();
    let app = router(&store);

    let batch = vec![
        MetricEnvelope::gauge("Alloc", 2048.0),
        MetricEnvelope::counter("PollCount", 4),
        MetricEnvelope::counter("PollCount", 1),
    ];
    let encoded = wire::encode_request(&batch, None).unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(encoded.body))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.get_gauge("Alloc").await.unwrap(), Some(2048.0));
    assert_eq!(store.get_counter("PollCount").await.unwrap(), Some(5));
}

#[tokio::test]
async fn malformed_batch_changes_nothing() {
    let store = memory_store();
    let app = router(&store);

    let body = r#"[{"id":"ok","type":"gauge","value":1},{"id":"bad","type":"counter"}]"#;
    let resp = app.oneshot(post_json("/updates/", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(store.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_gzip_is_rejected() {
    let store = memory_store();
    let app = router(&store);

    let req = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from("definitely not gzip"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_gzip_body_is_rejected_while_inflating() {
    let store = memory_store();
    let app = router(&store);

    // Inflates past the 16 MiB body cap from a few kilobytes on the wire.
    let mut plain = b"[".to_vec();
    plain.resize(17 * 1024 * 1024, b' ');
    plain.push(b']');
    let compressed = wire::gzip(&plain).unwrap();
    assert!(compressed.len() < 1024 * 1024);

    let req = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(compressed))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn responses_are_compressed_on_request() {
    let store = memory_store();
    store.add_gauge("Alloc", 1.0).await.unwrap();
    let app = router(&store);

    let req = Request::builder()
        .uri("/value/gauge/Alloc")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_ENCODING], "gzip");

    let plain = wire::gunzip(&body_bytes(resp).await).unwrap();
    assert_eq!(plain, b"1");
}

// ── Signing ─────────────────────────────────────────────────────

fn signed_router(store: &SharedStore, key: &str) -> Router {
    build_router(ApiState::new(store.clone()).with_key(Some(key)))
}

#[tokio::test]
async fn signed_batch_is_verified_and_response_signed() {
    let store = memory_store();
    let app = signed_router(&store, "secret");

    let batch = vec![MetricEnvelope::counter("PollCount", 1)];
    let encoded = wire::encode_request(&batch, Some(b"secret")).unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .header(wire::HASH_HEADER, encoded.signature.unwrap())
        .body(Body::from(encoded.body))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let digest = resp.headers()[wire::HASH_HEADER].to_str().unwrap().to_string();
    let body = body_bytes(resp).await;
    assert!(wire::verify(b"secret", &body, &digest));
    assert_eq!(store.get_counter("PollCount").await.unwrap(), Some(1));
}

#[tokio::test]
async fn hash_mismatch_is_rejected_before_parsing() {
    let store = memory_store();
    let app = signed_router(&store, "secret");

    let batch = vec![MetricEnvelope::counter("PollCount", 1)];
    let encoded = wire::encode_request(&batch, Some(b"wrong key")).unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .header(wire::HASH_HEADER, encoded.signature.unwrap())
        .body(Body::from(encoded.body))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(store.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn unsigned_request_passes_when_key_is_set() {
    let store = memory_store();
    let app = signed_router(&store, "secret");

    let resp = app.oneshot(post("/update/gauge/x/1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key(wire::HASH_HEADER));
}

// ── Pages and liveness ──────────────────────────────────────────

#[tokio::test]
async fn html_dump_lists_every_metric() {
    let store = memory_store();
    store.add_gauge("Alloc", 123.45).await.unwrap();
    store.add_counter("PollCount", 2).await.unwrap();
    let app = router(&store);

    for uri in ["/", "/value/"] {
        let resp = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_text(resp).await;
        assert!(html.contains("Alloc"));
        assert!(html.contains("123.45"));
        assert!(html.contains("PollCount"));
    }
}

#[tokio::test]
async fn ping_succeeds_for_memory_store() {
    let store = memory_store();
    let resp = router(&store).oneshot(get("/ping")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Persistence ─────────────────────────────────────────────────

#[tokio::test]
async fn flush_on_write_persists_each_update() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    let store: SharedStore = Arc::new(FileSnapshotStore::open(&path, true).unwrap());
    let app = build_router(ApiState::new(store.clone()).with_flush_on_write(true));

    let resp = app.oneshot(post("/update/counter/PollCount/7")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let restored = FileSnapshotStore::open(&path, true).unwrap();
    assert_eq!(restored.get_counter("PollCount").await.unwrap(), Some(7));
}

#[tokio::test]
async fn json_value_lookup_does_not_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    let store: SharedStore = Arc::new(FileSnapshotStore::open(&path, false).unwrap());
    store.add_gauge("Sys", 2.0).await.unwrap();
    let app = build_router(ApiState::new(store.clone()).with_flush_on_write(true));

    let resp = app
        .oneshot(post_json("/value/", r#"{"id":"Sys","type":"gauge"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!path.exists());
}

#[tokio::test]
async fn failed_flush_does_not_fail_the_update() {
    let dir = tempfile::tempdir().unwrap();
    // The snapshot path is a directory, so every flush fails.
    let store: SharedStore = Arc::new(FileSnapshotStore::open(dir.path(), false).unwrap());
    let app = build_router(ApiState::new(store.clone()).with_flush_on_write(true));

    let resp = app.oneshot(post("/update/gauge/x/1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.get_gauge("x").await.unwrap(), Some(1.0));
}
