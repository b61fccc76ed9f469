//! Guild admin management. Every endpoint requires an existing admin.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use comfybot_core::types::{GuildId, UserId};

use crate::error::AppResult;
use crate::middleware::actor::RequireGuildAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AdminChange {
    pub user_id: UserId,
    /// `false` when the set already had (or lacked) the user.
    pub changed: bool,
}

/// GET /api/v1/guilds/{guild_id}/admins
pub async fn list_admins(
    RequireGuildAdmin(_admin): RequireGuildAdmin,
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
) -> impl IntoResponse {
    let admins: Vec<UserId> = state.admins.admins(guild_id).await.into_iter().collect();
    Json(DataResponse { data: admins })
}

/// PUT /api/v1/guilds/{guild_id}/admins/{user_id}
pub async fn add_admin(
    RequireGuildAdmin(admin): RequireGuildAdmin,
    State(state): State<AppState>,
    Path((guild_id, user_id)): Path<(GuildId, UserId)>,
) -> AppResult<impl IntoResponse> {
    let changed = state.admins.add(guild_id, user_id).await?;
    tracing::info!(guild_id, user_id, changed, admin_id = admin.user_id, "Admin added");
    Ok(Json(DataResponse {
        data: AdminChange { user_id, changed },
    }))
}

/// DELETE /api/v1/guilds/{guild_id}/admins/{user_id}
pub async fn remove_admin(
    RequireGuildAdmin(admin): RequireGuildAdmin,
    State(state): State<AppState>,
    Path((guild_id, user_id)): Path<(GuildId, UserId)>,
) -> AppResult<impl IntoResponse> {
    let changed = state.admins.remove(guild_id, user_id).await?;
    tracing::info!(guild_id, user_id, changed, admin_id = admin.user_id, "Admin removed");
    Ok(Json(DataResponse {
        data: AdminChange { user_id, changed },
    }))
}
