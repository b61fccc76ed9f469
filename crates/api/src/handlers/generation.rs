//! Handlers for running and withdrawing generations.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use comfybot_core::command::CommandKind;
use comfybot_core::error::{CoreError, GenerationError};
use comfybot_core::options::GenerationOptions;
use comfybot_core::request::{GenerationRequest, RequestInput};
use comfybot_core::types::{GuildId, JobId, UserId};
use comfybot_db::repositories::StatsRepo;

use crate::error::{AppError, AppResult};
use crate::response::{decode_image, DataResponse, GenerationDto};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Request body for POST /generations.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub command: CommandKind,
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    /// `0` for direct messages.
    #[serde(default)]
    pub guild_id: GuildId,
    /// Prompt with inline `key:value` options.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Option<GenerationOptions>,
    /// Base64 PNG/JPEG/WebP.
    #[serde(default)]
    pub source_image: Option<String>,
    #[serde(default)]
    pub mask_image: Option<String>,
    /// Caller-chosen id, so the job can be withdrawn while this request is
    /// still waiting. Must not match an unfinished or recorded job.
    #[serde(default)]
    pub job_id: Option<JobId>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/generations
///
/// Runs the job to completion and answers with its images. The job runs
/// on its own task, so a dropped connection does not abandon it halfway.
pub async fn create_generation(
    State(state): State<AppState>,
    Json(input): Json<GenerateRequest>,
) -> AppResult<impl IntoResponse> {
    if input.command == CommandKind::CanvasEdit {
        return Err(AppError::BadRequest(
            "Canvas edits go through /guilds/{guild_id}/canvas/edits".into(),
        ));
    }

    let mut request = GenerationRequest::build(
        input.command,
        RequestInput {
            user_id: input.user_id,
            username: input.username,
            guild_id: input.guild_id,
            text: input.text,
            options: input.options,
            source_image: decode_image("source_image", input.source_image.as_deref())?,
            mask_image: decode_image("mask_image", input.mask_image.as_deref())?,
        },
    )?;
    if let Some(job_id) = input.job_id {
        if StatsRepo::is_recorded(&state.pool, &job_id.to_string()).await? {
            return Err(GenerationError::DuplicateJob(job_id).into());
        }
        request.job_id = job_id;
    }

    let orchestrator = Arc::clone(&state.orchestrator);
    let outcome = tokio::spawn(async move { orchestrator.generate(request).await })
        .await
        .map_err(|e| AppError::InternalError(format!("generation task failed: {e}")))??;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: GenerationDto::from(&outcome),
        }),
    ))
}

/// DELETE /api/v1/generations/{job_id}
///
/// Withdraw a job that is still waiting for a backend slot. Jobs already
/// submitted cannot be withdrawn.
pub async fn cancel_generation(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    if !state.orchestrator.cancel(job_id) {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Queued job",
            id: job_id.to_string(),
        }));
    }
    tracing::info!(%job_id, "Queued job withdrawn");
    Ok(Json(DataResponse {
        data: CancelResponse {
            job_id,
            cancelled: true,
        },
    }))
}
