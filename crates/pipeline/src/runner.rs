//! Runs one parameterized job on one backend.
//!
//! The runner owns the backend half of the job lifecycle:
//! `Pending -> Submitted -> Polling -> Completed | Failed | TimedOut`.
//! While polling, an optional [`VramWatchdog`] keeps reading the backend's
//! VRAM and stops the job if it goes over the threshold. The runner never
//! touches stats or the output directory; that is the orchestrator's job
//! once an artifact is in hand.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use comfybot_comfyui::api::ComfyUIApiError;
use comfybot_comfyui::backend::{cancel_prompt, GenerationBackend};
use comfybot_comfyui::poller::{poll_until_done, PollConfig, PollError};
use comfybot_core::admission::{self, Admission};
use comfybot_core::artifact::{Artifact, ArtifactImage};
use comfybot_core::error::GenerationError;
use comfybot_core::job::{Job, JobStatus};
use comfybot_core::settings::GenerationLimits;
use comfybot_events::{EventBus, JobEvent, JobEventKind};

use crate::templates::JobGraph;

/// Stops a polling job whose backend goes over the VRAM threshold.
#[derive(Debug, Clone)]
pub struct VramWatchdog {
    pub limits: GenerationLimits,
    pub interval: Duration,
}

impl VramWatchdog {
    /// Resolves with the reason once a reading is over the threshold.
    /// Failed readings are skipped; the poller already tracks a backend
    /// that stops answering.
    async fn tripped(&self, backend: &dyn GenerationBackend) -> String {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match backend.system_stats().await {
                Ok(stats) => {
                    if let Admission::Reject(reason) =
                        admission::check_resources(&self.limits, Ok(&stats.to_snapshot()))
                    {
                        return reason;
                    }
                }
                Err(e) => {
                    tracing::debug!(backend = backend.name(), error = %e, "VRAM reading failed");
                }
            }
        }
    }
}

pub struct JobRunner {
    poll: PollConfig,
    watchdog: Option<VramWatchdog>,
    events: Arc<EventBus>,
}

impl JobRunner {
    pub fn new(poll: PollConfig, watchdog: Option<VramWatchdog>, events: Arc<EventBus>) -> Self {
        Self {
            poll,
            watchdog,
            events,
        }
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    /// Upload, submit, poll and fetch. `job` must be `Pending`.
    ///
    /// On error the job is left in the terminal status matching the
    /// returned error.
    pub async fn run(
        &self,
        backend: &dyn GenerationBackend,
        job: &mut Job,
        mut graph: JobGraph,
        shutdown: &CancellationToken,
    ) -> Result<Artifact, GenerationError> {
        let job_id = job.id();

        // -- Uploads --
        for upload in std::mem::take(&mut graph.uploads) {
            let stored = backend
                .upload_image(&upload.filename, upload.bytes)
                .await
                .map_err(|e| fail(job, "image upload", e))?;
            if stored != upload.filename {
                tracing::debug!(%job_id, requested = %upload.filename, %stored, "Backend renamed upload");
                graph.rename_upload(upload.slot, &stored)?;
            }
        }

        // -- Submit --
        let response = backend
            .submit(&graph.graph, &job_id.to_string())
            .await
            .map_err(|e| fail(job, "submission", e))?;
        let prompt_id = response.prompt_id;
        job.mark_submitted(prompt_id.clone())?;
        tracing::info!(%job_id, %prompt_id, backend = backend.name(), template = %graph.key, "Workflow submitted");
        self.events.publish(JobEvent::new(
            job_id,
            job.request.user_id,
            job.request.guild_id,
            job.request.kind,
            JobEventKind::Submitted {
                prompt_id: prompt_id.clone(),
            },
        ));

        // -- Poll --
        job.transition(JobStatus::Polling)?;
        let polled = match &self.watchdog {
            Some(watchdog) => tokio::select! {
                polled = poll_until_done(backend, &prompt_id, &self.poll, shutdown) => polled,
                reason = watchdog.tripped(backend) => {
                    let outcome = cancel_prompt(backend, &prompt_id).await;
                    tracing::warn!(%job_id, %prompt_id, ?outcome, %reason, "Job stopped for VRAM");
                    job.transition(JobStatus::Failed)?;
                    return Err(GenerationError::Failed(format!(
                        "Generation stopped while running: {reason}"
                    )));
                }
            },
            None => poll_until_done(backend, &prompt_id, &self.poll, shutdown).await,
        };
        let outputs = match polled {
            Ok(outputs) => outputs,
            Err(PollError::TimedOut(after)) => {
                let outcome = cancel_prompt(backend, &prompt_id).await;
                tracing::warn!(%job_id, %prompt_id, ?after, ?outcome, "Job timed out");
                job.transition(JobStatus::TimedOut)?;
                return Err(GenerationError::TimedOut {
                    job_id,
                    timeout_secs: after.as_secs(),
                });
            }
            Err(PollError::Cancelled) => {
                cancel_prompt(backend, &prompt_id).await;
                job.transition(JobStatus::Failed)?;
                return Err(GenerationError::BackendUnavailable(
                    "service is shutting down".to_string(),
                ));
            }
            Err(PollError::Unavailable { attempts, last_error }) => {
                job.transition(JobStatus::Failed)?;
                return Err(GenerationError::BackendUnavailable(format!(
                    "lost contact with backend after {attempts} attempts: {last_error}"
                )));
            }
            Err(PollError::Failed(message)) => {
                job.transition(JobStatus::Failed)?;
                return Err(GenerationError::Failed(message));
            }
        };

        // -- Fetch --
        if outputs.is_empty() {
            job.transition(JobStatus::Failed)?;
            return Err(GenerationError::ArtifactMissing {
                job_id,
                detail: "backend reported no output images".to_string(),
            });
        }

        let mut images = Vec::with_capacity(outputs.len());
        for output in &outputs {
            let fetched = backend
                .fetch_output(output)
                .await
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    ArtifactImage::from_bytes(output.filename.clone(), bytes).map_err(|e| e.to_string())
                });
            match fetched {
                Ok(image) => images.push(image),
                Err(detail) => {
                    tracing::error!(%job_id, %prompt_id, file = %output.filename, %detail, "Output fetch failed");
                    job.transition(JobStatus::Failed)?;
                    return Err(GenerationError::ArtifactMissing {
                        job_id,
                        detail: format!("{}: {detail}", output.filename),
                    });
                }
            }
        }

        job.complete(Artifact::new(job_id, images))?;
        job.take_artifact().ok_or_else(|| GenerationError::ArtifactMissing {
            job_id,
            detail: "artifact was not attached".to_string(),
        })
    }
}

/// Mark `job` failed after a pre-poll backend call and classify the error.
fn fail(job: &mut Job, step: &str, err: ComfyUIApiError) -> GenerationError {
    tracing::warn!(job_id = %job.id(), step, error = %err, "Backend call failed");
    if let Err(e) = job.transition(JobStatus::Failed) {
        tracing::error!(job_id = %job.id(), error = %e, "Could not mark job failed");
    }
    if err.is_client_error() {
        GenerationError::Failed(format!("backend rejected {step}: {err}"))
    } else {
        GenerationError::BackendUnavailable(format!("{step} failed: {err}"))
    }
}
