//! Router tests for the records API, driven through `tower::ServiceExt::oneshot`
//! on the in-memory repository.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use async_trait::async_trait;
use gridsync_engine::{Fields, Record, RecordSchema, RemoteEvent};
use gridsync_server::db::{MemoryRepository, RecordChange, RecordRepository};
use gridsync_server::{app, AppState};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

fn test_app() -> (Router, AppState) {
    let state = AppState::new(Arc::new(MemoryRepository::new()));
    (app(state.clone()), state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

async fn post(app: &Router, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, "/records", Some(body)).await
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["feedConnections"], 0);

    let (status, body) = send(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "gridsync records server");
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_normalizes_and_assigns_id() {
    let (app, _) = test_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/records",
        Some(json!({"id": "tmp-3", "name": "  Carl ", "age": "42", "shoe": 9})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        body,
        json!({"id": 1, "name": "Carl", "age": 42, "city": "", "food": "", "color": ""})
    );
}

#[tokio::test]
async fn test_create_rejects_invalid_records() {
    let (app, state) = test_app();

    let (status, body) = post(&app, json!({"name": "", "age": 30})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing required field: name");

    let (status, _) = post(&app, json!({"name": "Bob", "age": 200})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, json!([1, 2])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.repo.list().await.unwrap().is_empty());
}

// ============================================================================
// List
// ============================================================================

#[tokio::test]
async fn test_list_is_ordered_by_id() {
    let (app, _) = test_app();

    for name in ["A", "B", "C"] {
        post(&app, json!({"name": name})).await;
    }
    send(&app, Method::DELETE, "/records/2", None).await;

    let (status, body) = send(&app, Method::GET, "/records", None).await;
    assert_eq!(status, StatusCode::OK);

    let ids: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 3]);
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_patch_updates_fields() {
    let (app, _) = test_app();
    post(&app, json!({"name": "Ann"})).await;

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/records/1",
        Some(json!({"city": " Oslo ", "age": 31})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (_, body) = send(&app, Method::GET, "/records", None).await;
    assert_eq!(
        body[0],
        json!({"id": 1, "name": "Ann", "age": 31, "city": "Oslo", "food": "", "color": ""})
    );
}

#[tokio::test]
async fn test_patch_errors() {
    let (app, _) = test_app();
    post(&app, json!({"name": "Ann"})).await;

    let (status, _) = send(&app, Method::PATCH, "/records/9", Some(json!({"name": "X"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::PATCH, "/records/1", Some(json!({"age": -1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::PATCH, "/records/tmp-1", Some(json!({"name": "X"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Rejected patches leave the row alone
    let (_, body) = send(&app, Method::GET, "/records", None).await;
    assert_eq!(body[0]["age"], Value::Null);
    assert_eq!(body[0]["name"], "Ann");
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (app, _) = test_app();
    post(&app, json!({"name": "Ann"})).await;

    let (status, _) = send(&app, Method::DELETE, "/records/1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Method::DELETE, "/records/1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, Method::GET, "/records", None).await;
    assert_eq!(body, json!([]));
}

// ============================================================================
// Change feed
// ============================================================================

#[tokio::test]
async fn test_writes_are_broadcast() {
    let (app, state) = test_app();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.feed.register(tx);

    post(&app, json!({"name": "Ann"})).await;
    send(&app, Method::PATCH, "/records/1", Some(json!({"age": 5}))).await;
    send(&app, Method::DELETE, "/records/1", None).await;

    let RemoteEvent::Insert { new } = rx.try_recv().unwrap() else {
        panic!("expected INSERT");
    };
    assert_eq!(new.id.as_persistent(), Some(1));

    let RemoteEvent::Update { old, new } = rx.try_recv().unwrap() else {
        panic!("expected UPDATE");
    };
    assert_eq!(old.unwrap().get("age"), Some(&Value::Null));
    assert_eq!(new.get("age"), Some(&json!(5)));

    let RemoteEvent::Delete { old } = rx.try_recv().unwrap() else {
        panic!("expected DELETE");
    };
    assert_eq!(old.get("name"), Some(&json!("Ann")));

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_rejected_and_noop_writes_are_not_broadcast() {
    let (app, state) = test_app();
    post(&app, json!({"name": "Ann"})).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    state.feed.register(tx);

    post(&app, json!({"name": ""})).await;
    send(&app, Method::PATCH, "/records/1", Some(json!({"name": "Ann"}))).await;
    send(&app, Method::PATCH, "/records/1", Some(json!({"age": 999}))).await;
    send(&app, Method::DELETE, "/records/42", None).await;

    assert!(rx.try_recv().is_err());
}

/// Memory repository that answers late: the earlier an update commits, the
/// longer it takes to return.
struct LaggingRepository {
    inner: MemoryRepository,
}

#[async_trait]
impl RecordRepository for LaggingRepository {
    async fn list(&self) -> gridsync_server::Result<Vec<Record>> {
        self.inner.list().await
    }

    async fn insert(&self, fields: &Fields) -> gridsync_server::Result<Record> {
        self.inner.insert(fields).await
    }

    async fn update(
        &self,
        id: i64,
        patch: &Fields,
        schema: &RecordSchema,
    ) -> gridsync_server::Result<Option<RecordChange>> {
        let change = self.inner.update(id, patch, schema).await?;
        let age = patch.get("age").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(age * 2))).await;
        Ok(change)
    }

    async fn delete(&self, id: i64) -> gridsync_server::Result<Option<Record>> {
        self.inner.delete(id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_are_broadcast_in_commit_order() {
    let state = AppState::new(Arc::new(LaggingRepository {
        inner: MemoryRepository::new(),
    }));
    let app = app(state.clone());
    post(&app, json!({"name": "Ann"})).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    state.feed.register(tx);

    let writers: Vec<_> = (0..16)
        .map(|age| {
            let app = app.clone();
            tokio::spawn(async move {
                send(&app, Method::PATCH, "/records/1", Some(json!({"age": age}))).await
            })
        })
        .collect();
    for writer in writers {
        let (status, _) = writer.await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let mut previous = Value::Null;
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        let RemoteEvent::Update { old, new } = event else {
            panic!("expected UPDATE");
        };
        assert_eq!(old.unwrap().get("age"), Some(&previous));
        previous = new.get("age").cloned().unwrap();
        count += 1;
    }
    assert_eq!(count, 16);

    let rows = state.repo.list().await.unwrap();
    assert_eq!(rows[0].get("age"), Some(&previous));
}

#[tokio::test]
async fn test_custom_schema() {
    let schema: RecordSchema = serde_json::from_value(json!({
        "fields": [
            {"name": "title", "fieldType": "string", "required": true}
        ]
    }))
    .unwrap();
    let state = AppState::new(Arc::new(MemoryRepository::new())).with_schema(schema);
    let app = app(state);

    let (status, body) = post(&app, json!({"title": "x", "name": "y"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"id": 1, "title": "x"}));
}
