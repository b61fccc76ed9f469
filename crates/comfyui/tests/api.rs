//! Drives [`ComfyUIApi`] against a minimal in-process HTTP stand-in for
//! ComfyUI.

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use comfybot_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use comfybot_comfyui::backend::{cancel_prompt, CancelOutcome, GenerationBackend};
use comfybot_comfyui::messages::{OutputImage, PromptStatus};

#[derive(Default)]
struct Recorded {
    prompts: Vec<Value>,
    deleted: Vec<String>,
    interrupts: usize,
    upload_content_type: Option<String>,
}

type Shared = Arc<Mutex<Recorded>>;

async fn prompt(State(rec): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    rec.lock().unwrap().prompts.push(body);
    Json(json!({"prompt_id": "p-1", "number": 3, "node_errors": {}}))
}

async fn history(Path(id): Path<String>) -> Json<Value> {
    if id == "p-1" {
        Json(json!({
            "p-1": {
                "status": {"status_str": "success", "completed": true, "messages": []},
                "outputs": {"9": {"images": [{"filename": "out.png", "subfolder": "", "type": "output"}]}}
            }
        }))
    } else {
        Json(json!({}))
    }
}

async fn view(Query(params): Query<std::collections::HashMap<String, String>>) -> (StatusCode, Vec<u8>) {
    match params.get("filename").map(String::as_str) {
        Some("out.png") => (StatusCode::OK, b"PNGDATA".to_vec()),
        _ => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

async fn upload(State(rec): State<Shared>, headers: HeaderMap, _body: Bytes) -> Json<Value> {
    rec.lock().unwrap().upload_content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(json!({"name": "input_1.png", "subfolder": "", "type": "input"}))
}

async fn queue_get() -> Json<Value> {
    Json(json!({
        "queue_running": [[1, "running-1", {}, {}, []]],
        "queue_pending": [[2, "waiting-1", {}, {}, []]]
    }))
}

async fn queue_post(State(rec): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    if let Some(ids) = body.get("delete").and_then(Value::as_array) {
        let mut rec = rec.lock().unwrap();
        rec.deleted
            .extend(ids.iter().filter_map(|v| v.as_str().map(str::to_string)));
    }
    StatusCode::OK
}

async fn interrupt(State(rec): State<Shared>) -> StatusCode {
    rec.lock().unwrap().interrupts += 1;
    StatusCode::OK
}

async fn system_stats() -> Json<Value> {
    Json(json!({
        "system": {},
        "devices": [{"name": "cuda:0", "type": "cuda", "index": 0, "vram_total": 1000, "vram_free": 400}]
    }))
}

async fn spawn_fake() -> (ComfyUIApi, Shared) {
    let recorded = Shared::default();
    let app = Router::new()
        .route("/prompt", post(prompt))
        .route("/history/{id}", get(history))
        .route("/view", get(view))
        .route("/upload/image", post(upload))
        .route("/queue", get(queue_get).post(queue_post))
        .route("/interrupt", post(interrupt))
        .route("/system_stats", get(system_stats))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let api = ComfyUIApi::new(format!("http://{addr}")).unwrap();
    (api, recorded)
}

#[tokio::test]
async fn submit_wraps_graph_in_prompt_envelope() {
    let (api, rec) = spawn_fake().await;
    let graph = json!({"3": {"class_type": "KSampler", "inputs": {}}});

    let response = api.submit_workflow(&graph, "client-a").await.unwrap();

    assert_eq!(response.prompt_id, "p-1");
    assert_eq!(response.number, 3);
    let sent = rec.lock().unwrap().prompts[0].clone();
    assert_eq!(sent["prompt"], graph);
    assert_eq!(sent["client_id"], "client-a");
}

#[tokio::test]
async fn history_is_interpreted() {
    let (api, _) = spawn_fake().await;
    assert_eq!(api.prompt_status("unknown").await.unwrap(), PromptStatus::InProgress);
    match api.prompt_status("p-1").await.unwrap() {
        PromptStatus::Completed(images) => assert_eq!(images[0].filename, "out.png"),
        other => panic!("Expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn view_downloads_bytes_and_maps_404() {
    let (api, _) = spawn_fake().await;
    let found = OutputImage {
        filename: "out.png".into(),
        subfolder: String::new(),
        kind: "output".into(),
    };
    assert_eq!(api.view(&found).await.unwrap(), b"PNGDATA");

    let missing = OutputImage {
        filename: "gone.png".into(),
        ..found
    };
    let err = api.view(&missing).await.unwrap_err();
    assert!(matches!(err, ComfyUIApiError::ApiError { status: 404, .. }));
}

#[tokio::test]
async fn upload_sends_multipart() {
    let (api, rec) = spawn_fake().await;
    let name = api.upload_image("input_1.png", vec![1, 2, 3]).await.unwrap();
    assert_eq!(name, "input_1.png");
    let content_type = rec.lock().unwrap().upload_content_type.clone().unwrap();
    assert!(content_type.starts_with("multipart/form-data"));
}

#[tokio::test]
async fn system_stats_snapshot() {
    let (api, _) = spawn_fake().await;
    let stats = api.system_stats().await.unwrap();
    assert_eq!(stats.to_snapshot().devices.len(), 1);
}

#[tokio::test]
async fn cancel_interrupts_running_and_dequeues_pending() {
    let (api, rec) = spawn_fake().await;
    let backend: &dyn GenerationBackend = &api;

    assert_eq!(cancel_prompt(backend, "running-1").await, CancelOutcome::Interrupted);
    assert_eq!(cancel_prompt(backend, "waiting-1").await, CancelOutcome::Dequeued);
    assert_eq!(cancel_prompt(backend, "other").await, CancelOutcome::NotFound);

    let rec = rec.lock().unwrap();
    assert_eq!(rec.interrupts, 1);
    assert_eq!(rec.deleted, vec!["waiting-1".to_string()]);
}

#[tokio::test]
async fn unreachable_backend_is_request_error() {
    let api = ComfyUIApi::new("http://127.0.0.1:1").unwrap();
    let err = api.get_queue().await.unwrap_err();
    assert!(matches!(err, ComfyUIApiError::Request(_)));
}
