//! Usage statistics and leaderboard.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use comfybot_core::types::{GuildId, UserId};
use comfybot_db::models::stats::UserStats;
use comfybot_db::repositories::StatsRepo;

use crate::error::{AppError, AppResult};
use crate::middleware::actor::RequireGuildAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

pub const DEFAULT_LEADERBOARD_SIZE: u32 = 10;
pub const MAX_LEADERBOARD_SIZE: u32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct LeaderboardQuery {
    pub top: Option<u32>,
}

/// Request body for POST /guilds/{guild_id}/stats/reset.
#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    /// Reset one user; the whole guild when absent.
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub removed: u64,
}

/// GET /api/v1/guilds/{guild_id}/stats/{user_id}
///
/// Users who never completed a job get all-zero counters.
pub async fn get_user_stats(
    State(state): State<AppState>,
    Path((guild_id, user_id)): Path<(GuildId, UserId)>,
) -> AppResult<impl IntoResponse> {
    let stats = StatsRepo::find(&state.pool, guild_id, user_id)
        .await?
        .unwrap_or_else(|| UserStats {
            guild_id,
            user_id,
            username: String::new(),
            images: 0,
            canvas_contributions: 0,
            depth_maps: 0,
            total_time_secs: 0.0,
            last_generated: None,
        });
    Ok(Json(DataResponse { data: stats }))
}

/// GET /api/v1/guilds/{guild_id}/leaderboard?top=N
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    Query(query): Query<LeaderboardQuery>,
) -> AppResult<impl IntoResponse> {
    let top = query.top.unwrap_or(DEFAULT_LEADERBOARD_SIZE);
    if top == 0 || top > MAX_LEADERBOARD_SIZE {
        return Err(AppError::BadRequest(format!(
            "top must be between 1 and {MAX_LEADERBOARD_SIZE}"
        )));
    }
    let board = StatsRepo::leaderboard(&state.pool, guild_id, top).await?;
    Ok(Json(DataResponse { data: board }))
}

/// POST /api/v1/guilds/{guild_id}/stats/reset
///
/// Admin only.
pub async fn reset_stats(
    RequireGuildAdmin(admin): RequireGuildAdmin,
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    Json(input): Json<ResetRequest>,
) -> AppResult<impl IntoResponse> {
    let removed = match input.user_id {
        Some(user_id) => u64::from(StatsRepo::reset_user(&state.pool, guild_id, user_id).await?),
        None => StatsRepo::reset_guild(&state.pool, guild_id).await?,
    };

    tracing::info!(
        guild_id,
        user_id = ?input.user_id,
        removed,
        admin_id = admin.user_id,
        "Stats reset by admin",
    );

    Ok(Json(DataResponse {
        data: ResetResponse { removed },
    }))
}
