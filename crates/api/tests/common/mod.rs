#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use tower::ServiceExt;

use comfybot_api::config::ServerConfig;
use comfybot_api::router::build_app_router;
use comfybot_api::startup::build_state;
use comfybot_api::state::AppState;
use comfybot_comfyui::api::ComfyUIApiError;
use comfybot_comfyui::backend::GenerationBackend;
use comfybot_comfyui::messages::{
    DeviceStats, OutputImage, PromptStatus, QueueSnapshot, SubmitResponse, SystemStats,
};

const GB: u64 = 1024 * 1024 * 1024;

pub const WORKFLOWS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../workflows");

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

pub fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(rgba)));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn png_base64(width: u32, height: u32, rgba: [u8; 4]) -> String {
    STANDARD.encode(png(width, height, rgba))
}

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// Completes every prompt on its first status check with one 64x64 image.
pub struct InstantBackend {
    pub submitted: Mutex<Vec<Value>>,
    pub output: Vec<u8>,
}

impl InstantBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            submitted: Mutex::new(Vec::new()),
            output: png(64, 64, [10, 200, 10, 255]),
        })
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for InstantBackend {
    fn name(&self) -> &str {
        "instant"
    }

    async fn upload_image(&self, filename: &str, _bytes: Vec<u8>) -> Result<String, ComfyUIApiError> {
        Ok(filename.to_string())
    }

    async fn submit(&self, graph: &Value, _client_id: &str) -> Result<SubmitResponse, ComfyUIApiError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(graph.clone());
        Ok(SubmitResponse {
            prompt_id: format!("prompt-{}", submitted.len()),
            number: 0,
            node_errors: json!({}),
        })
    }

    async fn prompt_status(&self, prompt_id: &str) -> Result<PromptStatus, ComfyUIApiError> {
        Ok(PromptStatus::Completed(vec![OutputImage {
            filename: format!("{prompt_id}_00001_.png"),
            subfolder: String::new(),
            kind: "output".to_string(),
        }]))
    }

    async fn fetch_output(&self, _image: &OutputImage) -> Result<Vec<u8>, ComfyUIApiError> {
        Ok(self.output.clone())
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        Ok(QueueSnapshot {
            queue_running: Vec::new(),
            queue_pending: Vec::new(),
        })
    }

    async fn cancel(&self, _prompt_id: &str) -> Result<(), ComfyUIApiError> {
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        Ok(())
    }

    async fn system_stats(&self) -> Result<SystemStats, ComfyUIApiError> {
        Ok(SystemStats {
            system: Value::Null,
            devices: vec![DeviceStats {
                name: "cuda:0".to_string(),
                kind: "cuda".to_string(),
                index: Some(0),
                vram_total: 24 * GB,
                vram_free: 23 * GB,
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub backend: Arc<InstantBackend>,
    _dir: tempfile::TempDir,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Build a `ServerConfig` rooted in `dir`, using the shipped workflow
/// templates and the given extra variables.
pub fn test_config(dir: &std::path::Path, extra: &[(&str, &str)]) -> ServerConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("HOST".into(), "127.0.0.1".into()),
        ("PORT".into(), "0".into()),
        ("DB_PATH".into(), dir.join("stats.db").display().to_string()),
        ("WORKFLOWS_PATH".into(), WORKFLOWS_DIR.into()),
        ("IMAGE_OUTPUT_PATH".into(), dir.join("output").display().to_string()),
        ("CANVAS_PATH".into(), dir.join("canvas").display().to_string()),
        ("PREFERENCES_FILE".into(), dir.join("prefs.json").display().to_string()),
        ("ADMINS_FILE".into(), dir.join("admins.json").display().to_string()),
        ("BOT_OWNER_ID".into(), "999".into()),
    ]);
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Build the full application with the production middleware stack over
/// an [`InstantBackend`].
pub async fn build_test_app() -> TestApp {
    build_test_app_with(&[]).await
}

pub async fn build_test_app_with(extra: &[(&str, &str)]) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), extra);
    let backend = InstantBackend::new();
    let state = build_state(
        config.clone(),
        vec![backend.clone() as Arc<dyn GenerationBackend>],
    )
    .await
    .unwrap();
    let router = build_app_router(state.clone(), &config);
    TestApp {
        router,
        state,
        backend,
        _dir: dir,
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Acting-user headers: `(user_id, roles, guild_owner)`.
pub type ActorHeaders<'a> = (u64, &'a str, bool);

pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    actor: Option<ActorHeaders<'_>>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user_id, roles, owner)) = actor {
        builder = builder
            .header("x-actor-id", user_id.to_string())
            .header("x-actor-roles", roles)
            .header("x-actor-guild-owner", owner.to_string());
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body), None).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the status and return the parsed body.
pub async fn expect(response: Response<Body>, status: StatusCode) -> Value {
    let actual = response.status();
    let json = body_json(response).await;
    assert_eq!(actual, status, "unexpected status, body: {json}");
    json
}
