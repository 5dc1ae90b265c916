//! Sync integration tests: reconcile and drain against a real local HTTP
//! canvas API.
//!
//! Run with: `cargo test -p canvas-link-sync --test integration`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde_json::{json, Value};

use canvas_link_core::canvas::{CanvasSnapshot, CanvasState, PlacedElement};
use canvas_link_sync::{
    CanvasRemote, CanvasStore, HttpCanvasRemote, ReconcileOutcome, Reconciler, SyncQueue,
};

#[derive(Clone)]
struct FakeBackend {
    /// Response body for `GET /api/canvas/state`; `None` answers 503.
    state: Option<Value>,
    state_delay: Duration,
    writes: Arc<Mutex<Vec<(String, Value)>>>,
}

async fn canvas_state(State(backend): State<FakeBackend>) -> Response {
    tokio::time::sleep(backend.state_delay).await;
    match backend.state {
        Some(body) => Json(body).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn record(backend: &FakeBackend, path: &str, body: Value) -> StatusCode {
    backend.writes.lock().unwrap().push((path.to_string(), body));
    StatusCode::OK
}

async fn glyphs(State(backend): State<FakeBackend>, Json(body): Json<Value>) -> StatusCode {
    record(&backend, "glyphs", body).await
}

async fn compositions(State(backend): State<FakeBackend>, Json(body): Json<Value>) -> StatusCode {
    record(&backend, "compositions", body).await
}

async fn minimized(State(backend): State<FakeBackend>, Json(body): Json<Value>) -> StatusCode {
    record(&backend, "minimized-windows", body).await
}

async fn start_backend(
    state: Option<Value>,
    state_delay: Duration,
) -> (String, Arc<Mutex<Vec<(String, Value)>>>) {
    let writes = Arc::new(Mutex::new(Vec::new()));
    let backend = FakeBackend {
        state,
        state_delay,
        writes: writes.clone(),
    };
    let app = axum::Router::new()
        .route("/api/canvas/state", get(canvas_state))
        .route("/api/canvas/glyphs", post(glyphs))
        .route("/api/canvas/compositions", post(compositions))
        .route("/api/canvas/minimized-windows", post(minimized))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://127.0.0.1:{port}"), writes)
}

fn glyph(id: &str) -> PlacedElement {
    PlacedElement {
        id: id.into(),
        symbol: "⊕".into(),
        x: 10,
        y: 20,
        width: None,
        height: None,
        result_data: None,
    }
}

fn local_canvas() -> CanvasState {
    let mut state = CanvasState::new();
    state.upsert_glyph(glyph("A"));
    state.upsert_glyph(glyph("B"));
    state.mark_minimized("win-1");
    state
}

#[tokio::test]
async fn test_merge_from_http_backend_and_persist() {
    let (origin, writes) = start_backend(
        Some(json!({
            "glyphs": [
                {"id": "B", "symbol": "remote", "x": 0, "y": 0},
                {"id": "C", "symbol": "ix", "x": 5, "y": 6},
            ],
            "compositions": [{"id": "comp-1", "edges": [
                {"from": "B", "to": "C", "direction": "right", "position": 0}
            ]}],
        })),
        Duration::ZERO,
    )
    .await;

    let remote = Arc::new(HttpCanvasRemote::new(&origin).unwrap());
    let reconciler = Reconciler::new(remote, Reconciler::DEFAULT_TIMEOUT);
    let mut local = local_canvas();
    let mut queue = SyncQueue::in_memory();

    let outcome = reconciler.reconcile(&mut local, &mut queue).await;
    let ReconcileOutcome::Merged(counts) = outcome.clone() else {
        panic!("expected merge, got {outcome:?}");
    };
    assert_eq!(counts.to_string(), "merged 1 glyph, 1 composition, 0 minimized windows");
    assert_eq!(local.glyphs["B"].symbol, "⊕");
    assert_eq!(local.compositions["comp-1"].members(), vec!["B", "C"]);
    assert!(queue.is_empty());
    assert!(writes.lock().unwrap().is_empty());

    // Caller persists after adopting.
    assert!(outcome.adopted_any());
    let dir = tempfile::tempdir().unwrap();
    let store = CanvasStore::new(dir.path());
    store.save(&local).await.unwrap();
    assert_eq!(store.load().await.unwrap(), local);
}

#[tokio::test]
async fn test_server_error_enqueues_then_drain_replays_in_order() {
    let (origin, writes) = start_backend(None, Duration::ZERO).await;
    let remote = Arc::new(HttpCanvasRemote::new(&origin).unwrap());
    let reconciler = Reconciler::new(remote.clone(), Reconciler::DEFAULT_TIMEOUT);

    let dir = tempfile::tempdir().unwrap();
    let mut local = local_canvas();
    let mut queue = SyncQueue::open(dir.path()).await.unwrap();

    let outcome = reconciler.reconcile(&mut local, &mut queue).await;
    match &outcome {
        ReconcileOutcome::Enqueued { entities, reason, .. } => {
            assert_eq!(*entities, 3);
            assert!(reason.contains("503"), "{reason}");
        }
        other => panic!("expected enqueue, got {other:?}"),
    }
    assert_eq!(SyncQueue::open(dir.path()).await.unwrap().len(), 3);

    let report = queue.drain(remote.as_ref()).await.unwrap();
    assert_eq!(report.sent, 3);
    assert!(queue.is_empty());

    let writes = writes.lock().unwrap().clone();
    let paths: Vec<_> = writes.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(paths, vec!["glyphs", "glyphs", "minimized-windows"]);
    assert_eq!(writes[0].1["id"], "A");
    assert_eq!(writes[2].1, json!({"id": "win-1"}));
}

#[tokio::test]
async fn test_slow_backend_falls_back_within_timeout() {
    let (origin, _writes) = start_backend(
        Some(serde_json::to_value(CanvasSnapshot::default()).unwrap()),
        Duration::from_secs(5),
    )
    .await;
    let remote = Arc::new(HttpCanvasRemote::new(&origin).unwrap());
    let reconciler = Reconciler::new(remote, Duration::from_millis(200));

    let mut local = local_canvas();
    let mut queue = SyncQueue::in_memory();
    let started = std::time::Instant::now();
    let outcome = reconciler.reconcile(&mut local, &mut queue).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(outcome, ReconcileOutcome::Enqueued { entities: 3, .. }));
}

#[tokio::test]
async fn test_undecodable_state_is_an_error() {
    let (origin, _writes) = start_backend(Some(json!({"glyphs": "nope"})), Duration::ZERO).await;
    let remote = HttpCanvasRemote::new(&origin).unwrap();
    assert!(remote.fetch_snapshot().await.is_err());
}

#[tokio::test]
async fn test_unreachable_backend_is_an_error() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let remote = HttpCanvasRemote::new(&format!("http://127.0.0.1:{port}")).unwrap();
    assert!(remote.fetch_snapshot().await.is_err());
    assert!(remote.mark_minimized("w").await.is_err());
}
