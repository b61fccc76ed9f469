#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};

use comfybot_comfyui::api::ComfyUIApiError;
use comfybot_comfyui::backend::GenerationBackend;
use comfybot_comfyui::messages::{
    DeviceStats, OutputImage, PromptStatus, QueueSnapshot, SubmitResponse, SystemStats,
};
use comfybot_comfyui::poller::PollConfig;
use comfybot_core::catalog::{ModelCatalog, ModelProfile};
use comfybot_core::command::{CommandKind, TemplateKey};
use comfybot_core::settings::{GenerationDefaults, GenerationLimits};
use comfybot_db::stores::{CanvasStore, PreferenceStore};
use comfybot_db::DbPool;
use comfybot_events::{EventBus, JobEvent};
use comfybot_pipeline::templates::{TemplateLibrary, WorkflowTemplate};
use comfybot_pipeline::{Orchestrator, OrchestratorConfig, OrchestratorParts};

pub const GB: u64 = 1024 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

pub fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(rgba)));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Finish from the third status check on, with one image.
    Complete,
    /// Never finish.
    Stuck,
    /// Report an execution error.
    Fail,
    /// Finish with no output images.
    MissingOutput,
    /// Finish with one image that cannot be downloaded.
    FetchFails,
}

/// In-memory ComfyUI stand-in.
pub struct FakeBackend {
    pub behavior: Mutex<Behavior>,
    pub output: Vec<u8>,
    pub vram_used: Mutex<Option<u64>>,
    pub stats_error: Mutex<bool>,
    pub submitted: Mutex<Vec<Value>>,
    pub uploads: Mutex<Vec<String>>,
    pub interrupts: AtomicUsize,
    pub dequeues: AtomicUsize,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    checks: Mutex<HashMap<String, usize>>,
}

impl FakeBackend {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            output: png(64, 64, [200, 10, 10, 255]),
            vram_used: Mutex::new(Some(GB)),
            stats_error: Mutex::new(false),
            submitted: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            interrupts: AtomicUsize::new(0),
            dequeues: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            checks: Mutex::new(HashMap::new()),
        })
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn upload_image(&self, filename: &str, _bytes: Vec<u8>) -> Result<String, ComfyUIApiError> {
        self.uploads.lock().unwrap().push(filename.to_string());
        Ok(filename.to_string())
    }

    async fn submit(&self, graph: &Value, _client_id: &str) -> Result<SubmitResponse, ComfyUIApiError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(graph.clone());
        let prompt_id = format!("prompt-{}", submitted.len());
        drop(submitted);

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(SubmitResponse {
            prompt_id,
            number: 0,
            node_errors: json!({}),
        })
    }

    async fn prompt_status(&self, prompt_id: &str) -> Result<PromptStatus, ComfyUIApiError> {
        let behavior = *self.behavior.lock().unwrap();
        let calls = {
            let mut checks = self.checks.lock().unwrap();
            let calls = checks.entry(prompt_id.to_string()).or_default();
            *calls += 1;
            *calls
        };
        match behavior {
            Behavior::Stuck => Ok(PromptStatus::InProgress),
            _ if calls < 3 => Ok(PromptStatus::InProgress),
            Behavior::Complete | Behavior::FetchFails => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(PromptStatus::Completed(vec![OutputImage {
                    filename: format!("{prompt_id}_00001_.png"),
                    subfolder: String::new(),
                    kind: "output".to_string(),
                }]))
            }
            Behavior::Fail => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(PromptStatus::Failed("CUDA out of memory".to_string()))
            }
            Behavior::MissingOutput => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(PromptStatus::Completed(Vec::new()))
            }
        }
    }

    async fn fetch_output(&self, _image: &OutputImage) -> Result<Vec<u8>, ComfyUIApiError> {
        if *self.behavior.lock().unwrap() == Behavior::FetchFails {
            return Err(ComfyUIApiError::ApiError {
                status: 404,
                body: "file not found".to_string(),
            });
        }
        Ok(self.output.clone())
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let last = self.submitted.lock().unwrap().len();
        Ok(QueueSnapshot {
            queue_running: vec![json!([0, format!("prompt-{last}")])],
            queue_pending: Vec::new(),
        })
    }

    async fn cancel(&self, _prompt_id: &str) -> Result<(), ComfyUIApiError> {
        self.dequeues.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn system_stats(&self) -> Result<SystemStats, ComfyUIApiError> {
        if *self.stats_error.lock().unwrap() {
            return Err(ComfyUIApiError::ApiError {
                status: 500,
                body: "stats unavailable".to_string(),
            });
        }
        let devices = match *self.vram_used.lock().unwrap() {
            Some(used) => vec![DeviceStats {
                name: "cuda:0".to_string(),
                kind: "cuda".to_string(),
                index: Some(0),
                vram_total: 24 * GB,
                vram_free: 24 * GB - used,
            }],
            None => Vec::new(),
        };
        Ok(SystemStats {
            system: Value::Null,
            devices,
        })
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

pub fn txt2img_graph() -> Value {
    json!({
        "3": {"class_type": "KSampler", "inputs": {
            "seed": 1, "steps": 20, "cfg": 7.0, "sampler_name": "euler", "scheduler": "normal",
            "denoise": 1.0, "model": ["4", 0], "positive": ["6", 0], "negative": ["7", 0],
            "latent_image": ["5", 0]
        }},
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "placeholder.safetensors"}},
        "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 512, "height": 512, "batch_size": 1}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
        "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0], "filename_prefix": "bot"}}
    })
}

pub fn inpaint_graph() -> Value {
    json!({
        "1": {"class_type": "LoadImage", "inputs": {"image": "source.png"}},
        "2": {"class_type": "LoadImageMask", "inputs": {"image": "mask.png", "channel": "red"}},
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "placeholder.safetensors"}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "3": {"class_type": "KSampler", "inputs": {
            "seed": 1, "steps": 20, "cfg": 7.0, "sampler_name": "euler", "scheduler": "normal",
            "positive": ["6", 0], "negative": ["7", 0]
        }},
        "9": {"class_type": "SaveImage", "inputs": {"images": ["3", 0]}}
    })
}

pub fn depth_graph() -> Value {
    json!({
        "1": {"class_type": "LoadImage", "inputs": {"image": "source.png"}},
        "2": {"class_type": "DepthAnythingPreprocessor", "inputs": {"image": ["1", 0], "resolution": 1024}},
        "3": {"class_type": "SaveImage", "inputs": {"images": ["2", 0]}}
    })
}

pub fn library() -> TemplateLibrary {
    let mut library = TemplateLibrary::default();
    library.insert(
        TemplateKey::standard(CommandKind::Text2Img),
        WorkflowTemplate::from_value("txt2img_workflow", txt2img_graph()).unwrap(),
    );
    library.insert(
        TemplateKey::standard(CommandKind::Animate),
        WorkflowTemplate::from_value("animate_workflow", txt2img_graph()).unwrap(),
    );
    for kind in [CommandKind::Inpaint, CommandKind::CanvasEdit] {
        library.insert(
            TemplateKey::standard(kind),
            WorkflowTemplate::from_value("inpaint_workflow", inpaint_graph()).unwrap(),
        );
    }
    library.insert(
        TemplateKey::standard(CommandKind::Depth),
        WorkflowTemplate::from_value("depth_workflow", depth_graph()).unwrap(),
    );
    library
}

pub fn catalog() -> ModelCatalog {
    ModelCatalog::new(
        "sdxl",
        [
            ("sdxl".to_string(), ModelProfile::file_only("sd_xl_base_1.0.safetensors")),
            ("uncanny".to_string(), ModelProfile::file_only("uncanny.safetensors")),
        ],
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub backend: Arc<FakeBackend>,
    pub events: Arc<EventBus>,
    pub pool: DbPool,
    pub output_dir: PathBuf,
    _dir: tempfile::TempDir,
}

pub struct HarnessOptions {
    pub behavior: Behavior,
    pub slots: usize,
    pub max_pending_per_user: usize,
    pub timeout: Duration,
    pub limits: GenerationLimits,
    pub vram_check_interval: Option<Duration>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            behavior: Behavior::Complete,
            slots: 2,
            max_pending_per_user: 5,
            timeout: Duration::from_secs(5),
            limits: GenerationLimits::default(),
            vram_check_interval: Some(Duration::from_millis(5)),
        }
    }
}

pub async fn harness(options: HarnessOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("stats.db").display());
    let pool = comfybot_db::create_pool(&url).await.unwrap();
    comfybot_db::run_migrations(&pool).await.unwrap();

    let backend = FakeBackend::new(options.behavior);
    let events = Arc::new(EventBus::default());
    let output_dir = dir.path().join("output");

    let orchestrator = Orchestrator::new(OrchestratorParts {
        config: OrchestratorConfig {
            defaults: GenerationDefaults::default(),
            limits: options.limits,
            poll: PollConfig {
                initial_delay: Duration::from_millis(2),
                max_delay: Duration::from_millis(10),
                multiplier: 1.5,
                timeout: options.timeout,
                max_consecutive_errors: 3,
            },
            vram_check_interval: options.vram_check_interval,
            max_concurrent_jobs: options.slots,
            max_pending_per_user: options.max_pending_per_user,
            output_dir: output_dir.clone(),
        },
        backends: vec![backend.clone() as Arc<dyn GenerationBackend>],
        templates: library(),
        catalog: catalog(),
        pool: pool.clone(),
        preferences: PreferenceStore::load(dir.path().join("prefs.json")).await.unwrap(),
        canvas_store: CanvasStore::new(dir.path().join("canvas")),
        events: Arc::clone(&events),
    });

    Harness {
        orchestrator: Arc::new(orchestrator),
        backend,
        events,
        pool,
        output_dir,
        _dir: dir,
    }
}

/// Everything published so far on `rx`.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
