//! The real client stack against a live server on a loopback port.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gridsync_client::grid;
use gridsync_client::{
    Bootstrap, HttpGateway, Readiness, RemoteError, RemoteGateway, SyncHandle, SyncSession,
};
use gridsync_engine::{
    Fields, Identity, LocalStoreAdapter, MemoryStore, Origin, RecordDraft, RecordSchema,
    RemoteEvent,
};
use gridsync_server::db::{MemoryRepository, RecordRepository};
use gridsync_server::{app, AppState};
use serde_json::json;
use tokio::net::TcpListener;

async fn spawn_server() -> (String, AppState) {
    let state = AppState::new(Arc::new(MemoryRepository::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

struct Client {
    store: Arc<Mutex<MemoryStore>>,
    handle: SyncHandle<MemoryStore>,
}

impl Client {
    async fn connect(url: &str) -> Self {
        let store = Arc::new(Mutex::new(MemoryStore::new()));
        let handle = Bootstrap::new(
            store.clone(),
            Arc::new(HttpGateway::new(url)),
            SyncSession::shared(),
        )
        .run(Readiness::ready())
        .await
        .unwrap();
        Self { store, handle }
    }

    fn records(&self) -> Vec<gridsync_engine::Record> {
        self.store.lock().unwrap().records()
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gateway_crud_round_trip() {
    let (url, _) = spawn_server().await;
    let gateway = HttpGateway::new(&url);

    let fields: Fields = serde_json::from_value(json!({"name": "Ann", "age": 30})).unwrap();
    let created = gateway.insert(&fields).await.unwrap();
    assert_eq!(created.id, Identity::Persistent(1));
    assert_eq!(created.get("city"), Some(&json!("")));

    let patch: Fields = serde_json::from_value(json!({"city": "Oslo"})).unwrap();
    gateway.update(1, &patch).await.unwrap();

    let all = gateway.fetch_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("city"), Some(&json!("Oslo")));

    let err = gateway.update(99, &patch).await.unwrap_err();
    assert!(err.is_not_found());

    let invalid: Fields = serde_json::from_value(json!({"name": ""})).unwrap();
    let err = gateway.insert(&invalid).await.unwrap_err();
    assert!(matches!(err, RemoteError::Status { status: 400, .. }));

    gateway.delete(1).await.unwrap();
    gateway.delete(1).await.unwrap();
    assert!(gateway.fetch_all().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn change_feed_streams_writes() {
    let (url, state) = spawn_server().await;
    let gateway = HttpGateway::new(&url);
    let mut subscription = gateway.subscribe().await.unwrap();

    // A write from someone else, straight over REST
    let response = reqwest::Client::new()
        .post(format!("{url}/records"))
        .json(&json!({"name": "Peer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let event = tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let RemoteEvent::Insert { new } = event else {
        panic!("expected INSERT, got {event:?}");
    };
    assert_eq!(new.get("name"), Some(&json!("Peer")));

    subscription.unsubscribe();
    eventually("feed connection to close", || {
        state.feed.connection_count() == 0
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_clients_converge() {
    let (url, state) = spawn_server().await;
    let schema = RecordSchema::people();
    let a = Client::connect(&url).await;
    let b = Client::connect(&url).await;

    // A adds an empty row, then fills in the name
    let tmp = {
        let mut store = a.store.lock().unwrap();
        let added = store.add(vec![RecordDraft::new(Fields::new())], Origin::Local);
        added[0].id.clone()
    };
    grid::edit_cell(&mut *a.store.lock().unwrap(), &schema, &tmp, "name", "Carl").unwrap();

    eventually("B to see the new row", || {
        let records = b.records();
        records.len() == 1 && records[0].get("name") == Some(&json!("Carl"))
    })
    .await;
    // A may briefly hold both the placeholder and the echoed row
    eventually("A and B to agree", || a.records() == b.records()).await;
    assert_eq!(a.records()[0].id, Identity::Persistent(1));

    // B edits, A follows
    grid::edit_cell(
        &mut *b.store.lock().unwrap(),
        &schema,
        &Identity::Persistent(1),
        "city",
        "Rome",
    )
    .unwrap();
    eventually("A to see the edit", || {
        a.records()[0].get("city") == Some(&json!("Rome"))
    })
    .await;

    // A removes, B follows
    a.store
        .lock()
        .unwrap()
        .remove(&[Identity::Persistent(1)], Origin::Local);
    eventually("B to drop the row", || b.records().is_empty()).await;

    assert!(state.repo.list().await.unwrap().is_empty());

    a.handle.shutdown();
    b.handle.shutdown();
    eventually("feed connections to close", || {
        state.feed.connection_count() == 0
    })
    .await;
}
