//! Shared per-guild canvas.
//!
//! A canvas mutation holds the guild's async lock from the moment the
//! current canvas is read until the new revision is committed, backend job
//! included, so concurrent edits in one guild apply one after another and
//! none is lost. Different guilds never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use comfybot_core::artifact::ArtifactImage;
use comfybot_core::canvas::{composite_masked, CanvasMetadata, CanvasSnapshot};
use comfybot_core::command::CommandKind;
use comfybot_core::error::GenerationError;
use comfybot_core::request::{GenerationRequest, RequestInput};
use comfybot_core::types::GuildId;
use comfybot_db::stores::CanvasStore;

use crate::orchestrator::{GenerationOutcome, Orchestrator, StatKind};

pub struct CanvasService {
    store: CanvasStore,
    locks: Mutex<HashMap<GuildId, Arc<tokio::sync::Mutex<()>>>>,
}

impl CanvasService {
    pub fn new(store: CanvasStore) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, guild_id: GuildId) -> GuildLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(locks.entry(guild_id).or_default())
        };
        GuildLock {
            guard: Some(lock.lock_owned().await),
            guild_id,
            locks: &self.locks,
        }
    }

    /// Guilds with a lock entry (held or awaited).
    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    async fn load(&self, guild_id: GuildId) -> Result<Option<CanvasSnapshot>, GenerationError> {
        self.store
            .load(guild_id)
            .await
            .map_err(|e| GenerationError::Storage(e.to_string()))
    }

    async fn commit(&self, snapshot: &CanvasSnapshot) -> Result<(), GenerationError> {
        self.store
            .commit(snapshot)
            .await
            .map_err(|e| GenerationError::Storage(e.to_string()))
    }
}

/// Holds one guild's canvas lock. Dropping it releases the lock and removes
/// the map entry once nobody else holds or awaits it.
struct GuildLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    guild_id: GuildId,
    locks: &'a Mutex<HashMap<GuildId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Drop for GuildLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        if locks
            .get(&self.guild_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.guild_id);
        }
    }
}

/// A committed canvas revision and the job that produced it.
#[derive(Debug, Clone)]
pub struct CanvasOutcome {
    pub metadata: CanvasMetadata,
    pub generation: GenerationOutcome,
}

impl Orchestrator {
    /// Generate a fresh canvas from `input.text`, replacing any existing
    /// canvas in the guild.
    pub async fn start_canvas(&self, input: RequestInput) -> Result<CanvasOutcome, GenerationError> {
        let request = GenerationRequest::build(CommandKind::Text2Img, input)?;
        let _guard = self.canvas.lock(request.guild_id).await;

        let result: Result<(CanvasMetadata, GenerationOutcome), GenerationError> = async {
            let produced = self.produce(&request).await?;
            let image = first_image(&request, produced.images)?;
            let metadata = CanvasMetadata::new(
                request.guild_id,
                request.user_id,
                request.prompt.clone(),
                (image.width, image.height),
                Utc::now(),
            );
            let snapshot = CanvasSnapshot {
                metadata,
                image: image.bytes.clone(),
            };

            let images = self.save_images(&request, vec![image]).await?;
            self.canvas.commit(&snapshot).await?;
            tracing::info!(guild_id = request.guild_id, job_id = %request.job_id, "Canvas started");

            Ok((
                snapshot.metadata,
                GenerationOutcome {
                    job_id: request.job_id,
                    kind: request.kind,
                    prompt_id: produced.prompt_id,
                    settings: produced.settings,
                    images,
                    duration: produced.started.elapsed(),
                },
            ))
        }
        .await;

        self.finish_canvas(&request, StatKind::Images, result).await
    }

    /// Inpaint the masked region of the guild's canvas with `input.text`
    /// and commit the composite as the next revision.
    pub async fn add_canvas(&self, mut input: RequestInput) -> Result<CanvasOutcome, GenerationError> {
        let guild_id = input.guild_id;
        let _guard = self.canvas.lock(guild_id).await;

        let current = self.canvas.load(guild_id).await?.ok_or_else(|| {
            GenerationError::Parameter("No canvas has been started here yet.".to_string())
        })?;
        input.source_image = Some(current.image.clone());
        let request = GenerationRequest::build(CommandKind::CanvasEdit, input)?;

        let result: Result<(CanvasMetadata, GenerationOutcome), GenerationError> = async {
            let produced = self.produce(&request).await?;
            let generated = first_image(&request, produced.images)?;
            let mask = request.mask_image.as_deref().unwrap_or_default();
            let composite = composite_masked(&current.image, &generated.bytes, mask)?;

            let metadata = current.metadata.with_edit(
                request.user_id,
                &request.prompt,
                request.job_id,
                Utc::now(),
            );
            let image = ArtifactImage {
                filename: format!("canvas-{}.png", metadata.revision),
                width: metadata.width,
                height: metadata.height,
                bytes: composite.clone(),
            };
            let images = self.save_images(&request, vec![image]).await?;

            let snapshot = CanvasSnapshot {
                metadata,
                image: composite,
            };
            self.canvas.commit(&snapshot).await?;
            tracing::info!(
                guild_id,
                job_id = %request.job_id,
                revision = snapshot.metadata.revision,
                "Canvas edit committed",
            );

            Ok((
                snapshot.metadata,
                GenerationOutcome {
                    job_id: request.job_id,
                    kind: request.kind,
                    prompt_id: produced.prompt_id,
                    settings: produced.settings,
                    images,
                    duration: produced.started.elapsed(),
                },
            ))
        }
        .await;

        self.finish_canvas(&request, StatKind::CanvasContribution, result).await
    }

    /// Current canvas for `guild_id`, if any.
    pub async fn show_canvas(&self, guild_id: GuildId) -> Result<Option<CanvasSnapshot>, GenerationError> {
        self.canvas.load(guild_id).await
    }

    async fn finish_canvas(
        &self,
        request: &GenerationRequest,
        stat: StatKind,
        result: Result<(CanvasMetadata, GenerationOutcome), GenerationError>,
    ) -> Result<CanvasOutcome, GenerationError> {
        match result {
            Ok((metadata, generation)) => {
                let generation = self
                    .finish(request, stat, Ok(generation))
                    .await?;
                Ok(CanvasOutcome {
                    metadata,
                    generation,
                })
            }
            Err(e) => {
                let _ = self
                    .finish(request, stat, Err(e.clone()))
                    .await;
                Err(e)
            }
        }
    }
}

fn first_image(
    request: &GenerationRequest,
    images: Vec<ArtifactImage>,
) -> Result<ArtifactImage, GenerationError> {
    images
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::ArtifactMissing {
            job_id: request.job_id,
            detail: "no image to place on the canvas".to_string(),
        })
}
