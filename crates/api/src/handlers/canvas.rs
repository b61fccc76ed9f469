//! Handlers for the shared per-guild canvas.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use comfybot_core::error::CoreError;
use comfybot_core::options::GenerationOptions;
use comfybot_core::request::RequestInput;
use comfybot_core::types::{GuildId, UserId};

use crate::error::{AppError, AppResult};
use crate::response::{decode_image, CanvasDto, CanvasEditDto, DataResponse};
use crate::state::AppState;

/// Request body for POST /guilds/{guild_id}/canvas.
#[derive(Debug, Deserialize)]
pub struct StartCanvasRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub options: Option<GenerationOptions>,
}

/// Request body for POST /guilds/{guild_id}/canvas/edits.
#[derive(Debug, Deserialize)]
pub struct AddToCanvasRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub options: Option<GenerationOptions>,
    /// Base64 mask, white marks the region to repaint.
    pub mask_image: String,
}

/// POST /api/v1/guilds/{guild_id}/canvas
///
/// Generate a new canvas, replacing the current one.
pub async fn start_canvas(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    Json(input): Json<StartCanvasRequest>,
) -> AppResult<impl IntoResponse> {
    let outcome = state
        .orchestrator
        .start_canvas(RequestInput {
            user_id: input.user_id,
            username: input.username,
            guild_id,
            text: input.text,
            options: input.options,
            source_image: None,
            mask_image: None,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: CanvasEditDto::from(&outcome),
        }),
    ))
}

/// GET /api/v1/guilds/{guild_id}/canvas
pub async fn show_canvas(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state
        .orchestrator
        .show_canvas(guild_id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Canvas for guild",
                id: guild_id.to_string(),
            })
        })?;
    Ok(Json(DataResponse {
        data: CanvasDto::from(&snapshot),
    }))
}

/// POST /api/v1/guilds/{guild_id}/canvas/edits
///
/// Repaint the masked region and commit the next revision. Edits in one
/// guild apply one at a time.
pub async fn add_to_canvas(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    Json(input): Json<AddToCanvasRequest>,
) -> AppResult<impl IntoResponse> {
    let mask_image = decode_image("mask_image", Some(&input.mask_image))?;
    let outcome = state
        .orchestrator
        .add_canvas(RequestInput {
            user_id: input.user_id,
            username: input.username,
            guild_id,
            text: input.text,
            options: input.options,
            source_image: None,
            mask_image,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: CanvasEditDto::from(&outcome),
        }),
    ))
}
