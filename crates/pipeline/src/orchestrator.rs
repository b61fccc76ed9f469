//! The generation orchestrator.
//!
//! Held by the API as an `Arc<Orchestrator>`. One call to
//! [`Orchestrator::generate`] drives a request through the whole lifecycle:
//!
//! 1. Resolve the workflow template and parameterize a private copy.
//! 2. Check static admission limits.
//! 3. Enqueue on the least-loaded backend and wait for a slot.
//! 4. Re-check backend VRAM headroom, then upload, submit and poll.
//!    Animations repeat steps 1-4 once per frame and assemble the frames.
//! 5. Write the output images to disk.
//! 6. Record usage stats (completed jobs only) and the model preference.
//! 7. Publish exactly one terminal [`JobEvent`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use comfybot_comfyui::backend::GenerationBackend;
use comfybot_comfyui::poller::PollConfig;
use comfybot_core::artifact::{encode_gif, ArtifactImage};
use comfybot_core::catalog::ModelCatalog;
use comfybot_core::command::{CommandKind, TemplateKey};
use comfybot_core::error::GenerationError;
use comfybot_core::job::{Job, JobStatus};
use comfybot_core::request::GenerationRequest;
use comfybot_core::settings::{GenerationDefaults, GenerationLimits};
use comfybot_core::types::{JobId, UserId};
use comfybot_db::models::stats::{CompletionRecord, RecordOutcome};
use comfybot_db::repositories::StatsRepo;
use comfybot_db::stores::{write_atomic, CanvasStore, PreferenceStore};
use comfybot_db::DbPool;
use comfybot_events::{EventBus, JobEvent, JobEventKind};

use crate::admission::AdmissionController;
use crate::canvas::CanvasService;
use crate::queue::{BackendLoad, QueueManager};
use crate::runner::{JobRunner, VramWatchdog};
use crate::templates::{parameterize, ParameterContext, ResolvedSettings, TemplateLibrary};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub defaults: GenerationDefaults,
    pub limits: GenerationLimits,
    pub poll: PollConfig,
    /// Re-check backend VRAM this often while a job runs; `None` disables.
    pub vram_check_interval: Option<Duration>,
    pub max_concurrent_jobs: usize,
    pub max_pending_per_user: usize,
    /// Where generated images are written.
    pub output_dir: PathBuf,
}

/// Everything the orchestrator is assembled from.
pub struct OrchestratorParts {
    pub config: OrchestratorConfig,
    pub backends: Vec<Arc<dyn GenerationBackend>>,
    pub templates: TemplateLibrary,
    pub catalog: ModelCatalog,
    pub pool: DbPool,
    pub preferences: PreferenceStore,
    pub canvas_store: CanvasStore,
    pub events: Arc<EventBus>,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// An output image written to the output directory.
#[derive(Debug, Clone)]
pub struct SavedImage {
    pub path: PathBuf,
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub job_id: JobId,
    pub kind: CommandKind,
    pub prompt_id: Option<String>,
    pub settings: ResolvedSettings,
    pub images: Vec<SavedImage>,
    pub duration: Duration,
}

/// Which usage counter a completed job advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatKind {
    Images,
    DepthMap,
    CanvasContribution,
}

impl StatKind {
    fn for_kind(kind: CommandKind) -> Self {
        match kind {
            CommandKind::Depth => Self::DepthMap,
            CommandKind::CanvasEdit => Self::CanvasContribution,
            _ => Self::Images,
        }
    }
}

/// Backend output before it is written anywhere.
pub(crate) struct Produced {
    /// When the backend slot was granted. Queue wait is not generation time.
    pub started: Instant,
    pub prompt_id: Option<String>,
    pub settings: ResolvedSettings,
    pub images: Vec<ArtifactImage>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    templates: TemplateLibrary,
    catalog: ModelCatalog,
    defaults: GenerationDefaults,
    admission: AdmissionController,
    queue: Arc<QueueManager>,
    runner: JobRunner,
    pool: DbPool,
    preferences: PreferenceStore,
    pub(crate) canvas: CanvasService,
    events: Arc<EventBus>,
    output_dir: PathBuf,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        let OrchestratorParts {
            config,
            backends,
            templates,
            catalog,
            pool,
            preferences,
            canvas_store,
            events,
        } = parts;

        tracing::info!(
            backends = backends.len(),
            templates = templates.len(),
            max_concurrent_jobs = config.max_concurrent_jobs,
            default_model = catalog.default_model(),
            "Orchestrator ready",
        );

        Self {
            queue: QueueManager::new(backends, config.max_concurrent_jobs, config.max_pending_per_user),
            runner: JobRunner::new(
                config.poll,
                config.vram_check_interval.map(|interval| VramWatchdog {
                    limits: config.limits.clone(),
                    interval,
                }),
                Arc::clone(&events),
            ),
            admission: AdmissionController::new(config.limits),
            defaults: config.defaults,
            output_dir: config.output_dir,
            templates,
            catalog,
            pool,
            preferences,
            canvas: CanvasService::new(canvas_store),
            events,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn defaults(&self) -> &GenerationDefaults {
        &self.defaults
    }

    pub fn limits(&self) -> &GenerationLimits {
        self.admission.limits()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn backend_loads(&self) -> Vec<BackendLoad> {
        self.queue.loads()
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    /// Stop waiting jobs and interrupt polling ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Withdraw a job still waiting for a backend slot.
    pub fn cancel(&self, job_id: JobId) -> bool {
        self.queue.cancel(job_id)
    }

    /// Run `request` to completion.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome, GenerationError> {
        let result: Result<GenerationOutcome, GenerationError> = async {
            let produced = match request.kind {
                CommandKind::Animate => self.produce_animation(&request).await?,
                _ => self.produce(&request).await?,
            };
            let images = self.save_images(&request, produced.images).await?;
            Ok(GenerationOutcome {
                job_id: request.job_id,
                kind: request.kind,
                prompt_id: produced.prompt_id,
                settings: produced.settings,
                images,
                duration: produced.started.elapsed(),
            })
        }
        .await;
        self.finish(&request, StatKind::for_kind(request.kind), result).await
    }

    // -- Lifecycle steps ----------------------------------------------------------

    /// Template, admission, queue and backend. Returns the fetched images.
    pub(crate) async fn produce(&self, request: &GenerationRequest) -> Result<Produced, GenerationError> {
        let mut job = Job::new(request.clone());
        let result = self.produce_job(&mut job).await;

        if let Err(e) = &result {
            if job.status() == JobStatus::Pending {
                let to = match e {
                    GenerationError::Cancelled(_) => JobStatus::Cancelled,
                    GenerationError::Parameter(_)
                    | GenerationError::AdmissionRejected(_)
                    | GenerationError::DuplicateJob(_) => JobStatus::Rejected,
                    _ => JobStatus::Failed,
                };
                if let Err(err) = job.transition(to) {
                    tracing::error!(job_id = %job.id(), error = %err, "Could not record job status");
                }
            }
        }
        tracing::debug!(job_id = %job.id(), status = job.status().as_str(), "Job settled");
        result
    }

    /// One backend job per frame, seeds counting up from the requested (or
    /// a random) seed. A failed frame fails the animation.
    async fn produce_animation(&self, request: &GenerationRequest) -> Result<Produced, GenerationError> {
        let frames = request.options.frames_or_default();
        let base_seed = request
            .options
            .seed
            .unwrap_or_else(|| rand::rng().random_range(0..=u64::from(u32::MAX)));

        let mut first: Option<(Instant, ResolvedSettings)> = None;
        let mut prompt_id = None;
        let mut encoded = Vec::with_capacity(frames as usize);
        for index in 0..frames {
            let mut frame = request.clone();
            frame.options.seed = Some(base_seed.wrapping_add(u64::from(index)));
            let produced = self.produce(&frame).await?;

            let image = produced.images.into_iter().next().ok_or_else(|| {
                GenerationError::ArtifactMissing {
                    job_id: request.job_id,
                    detail: format!("frame {} produced no image", index + 1),
                }
            })?;
            tracing::debug!(job_id = %request.job_id, frame = index + 1, frames, "Animation frame ready");
            encoded.push(image.bytes);
            prompt_id = produced.prompt_id;
            first.get_or_insert((produced.started, produced.settings));
        }

        let (started, settings) = first.ok_or_else(|| {
            GenerationError::Parameter("An animation needs at least one frame".to_string())
        })?;
        let gif = encode_gif(&encoded, request.options.speed_or_default())?;
        Ok(Produced {
            started,
            prompt_id,
            settings,
            images: vec![gif],
        })
    }

    async fn produce_job(&self, job: &mut Job) -> Result<Produced, GenerationError> {
        let request = &job.request;
        let job_id = request.job_id;
        let key = TemplateKey::new(request.kind, request.options.template_variant(request.kind));
        let template = self.templates.get(key)?;

        let preferred = if request.kind.uses_model() && request.options.model.is_none() {
            self.preferences.model_for(request.user_id).await
        } else {
            None
        };
        let ctx = ParameterContext {
            catalog: &self.catalog,
            defaults: &self.defaults,
            preferred_model: preferred.as_deref(),
        };
        let graph = parameterize(&template, key, request, &ctx)?;
        let settings = graph.settings.clone();

        let demand = AdmissionController::demand(request, &settings)?;
        self.admission.check_static(&demand)?;

        let ticket = self.queue.enqueue(job_id, request.user_id)?;
        self.publish(
            request,
            JobEventKind::Queued {
                backend: ticket.backend(),
                position: ticket.position(),
            },
        );

        let permit = tokio::select! {
            _ = self.shutdown.cancelled() => {
                return Err(GenerationError::BackendUnavailable("service is shutting down".into()));
            }
            permit = ticket.acquire() => permit?,
        };
        let started = Instant::now();
        let backend = self.queue.backend(permit.backend());
        self.admission.check_backend(backend.as_ref()).await?;

        let artifact = self
            .runner
            .run(backend.as_ref(), job, graph, &self.shutdown)
            .await?;
        drop(permit);

        Ok(Produced {
            started,
            prompt_id: job.prompt_id().map(str::to_string),
            settings,
            images: artifact.images,
        })
    }

    /// Write images to the output directory as `<kind>_<job_id>_<n>.<ext>`.
    pub(crate) async fn save_images(
        &self,
        request: &GenerationRequest,
        images: Vec<ArtifactImage>,
    ) -> Result<Vec<SavedImage>, GenerationError> {
        let mut saved = Vec::with_capacity(images.len());
        for (index, image) in images.into_iter().enumerate() {
            let extension = Path::new(&image.filename)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("png");
            let filename = format!("{}_{}_{index}.{extension}", request.kind, request.job_id.simple());
            let path = self.output_dir.join(&filename);
            write_atomic(&path, &image.bytes)
                .await
                .map_err(|e| GenerationError::Storage(e.to_string()))?;
            saved.push(SavedImage {
                path,
                filename,
                width: image.width,
                height: image.height,
                bytes: image.bytes,
            });
        }
        Ok(saved)
    }

    /// Record stats for a completed job and publish its terminal event.
    pub(crate) async fn finish(
        &self,
        request: &GenerationRequest,
        stat: StatKind,
        result: Result<GenerationOutcome, GenerationError>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let result = match result {
            Ok(outcome) => self.record_completion(request, stat, &outcome).await.map(|()| outcome),
            Err(e) => Err(e),
        };

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %request.job_id,
                    user_id = request.user_id,
                    guild_id = request.guild_id,
                    command = %request.kind,
                    images = outcome.images.len(),
                    duration_ms = outcome.duration.as_millis() as u64,
                    "Generation completed",
                );
                self.publish(
                    request,
                    JobEventKind::Completed {
                        images: outcome.images.len(),
                        duration_ms: outcome.duration.as_millis() as u64,
                    },
                );
            }
            Err(e) => {
                log_failure(request, e);
                self.publish(request, terminal_event(e));
            }
        }
        result
    }

    async fn record_completion(
        &self,
        request: &GenerationRequest,
        stat: StatKind,
        outcome: &GenerationOutcome,
    ) -> Result<(), GenerationError> {
        if let Some(model) = &request.options.model {
            self.remember_model(request.user_id, model).await;
        }

        let record = CompletionRecord {
            job_id: request.job_id,
            guild_id: request.guild_id,
            user_id: request.user_id,
            username: request.username.clone(),
            images: match stat {
                StatKind::Images => outcome.images.len() as u32,
                _ => 0,
            },
            canvas_contributions: u32::from(stat == StatKind::CanvasContribution),
            depth_maps: u32::from(stat == StatKind::DepthMap),
            duration_secs: outcome.duration.as_secs_f64(),
            completed_at: Utc::now(),
        };

        match StatsRepo::record_completion(&self.pool, &record).await {
            Ok(RecordOutcome::Recorded) => Ok(()),
            Ok(RecordOutcome::Duplicate) => {
                tracing::warn!(job_id = %request.job_id, "Completion already recorded");
                Ok(())
            }
            Err(e) => Err(GenerationError::Storage(format!("failed to record stats: {e}"))),
        }
    }

    async fn remember_model(&self, user_id: UserId, model: &str) {
        let key = model.trim().to_lowercase();
        if let Err(e) = self.preferences.set_model(user_id, &key).await {
            tracing::warn!(user_id, model = %key, error = %e, "Failed to save model preference");
        }
    }

    fn publish(&self, request: &GenerationRequest, kind: JobEventKind) {
        self.events.publish(JobEvent::new(
            request.job_id,
            request.user_id,
            request.guild_id,
            request.kind,
            kind,
        ));
    }
}

fn terminal_event(err: &GenerationError) -> JobEventKind {
    match err {
        GenerationError::Parameter(_)
        | GenerationError::AdmissionRejected(_)
        | GenerationError::DuplicateJob(_) => JobEventKind::Rejected {
            code: err.code().to_string(),
            reason: err.to_string(),
        },
        GenerationError::TimedOut { timeout_secs, .. } => JobEventKind::TimedOut {
            timeout_secs: *timeout_secs,
        },
        GenerationError::Cancelled(_) => JobEventKind::Cancelled,
        _ => JobEventKind::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    }
}

fn log_failure(request: &GenerationRequest, err: &GenerationError) {
    let job_id = request.job_id;
    match err {
        GenerationError::Template(_) | GenerationError::ArtifactMissing { .. } | GenerationError::Storage(_) => {
            tracing::error!(%job_id, command = %request.kind, code = err.code(), error = %err, "Generation failed");
        }
        GenerationError::Parameter(_)
        | GenerationError::AdmissionRejected(_)
        | GenerationError::Cancelled(_)
        | GenerationError::DuplicateJob(_) => {
            tracing::info!(%job_id, code = err.code(), reason = %err, "Generation not run");
        }
        _ => {
            tracing::warn!(%job_id, command = %request.kind, code = err.code(), error = %err, "Generation failed");
        }
    }
}
