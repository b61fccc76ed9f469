//! Acting-user extractors.
//!
//! The chat dispatcher in front of this server has already authenticated
//! the user; it describes them with headers:
//!
//! | Header                | Value                         |
//! |-----------------------|-------------------------------|
//! | `x-actor-id`          | user id (required)            |
//! | `x-actor-roles`       | comma-separated role ids      |
//! | `x-actor-guild-owner` | `true` when they own the guild |

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

use comfybot_core::auth::Actor;
use comfybot_core::error::CoreError;
use comfybot_core::types::GuildId;

use crate::error::AppError;
use crate::state::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";
pub const ACTOR_GUILD_OWNER_HEADER: &str = "x-actor-guild-owner";

/// The user on whose behalf the request is made.
#[derive(Debug, Clone)]
pub struct ActingUser(pub Actor);

impl FromRequestParts<AppState> for ActingUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        };

        let user_id = header(ACTOR_ID_HEADER)
            .ok_or_else(|| AppError::BadRequest(format!("Missing {ACTOR_ID_HEADER} header")))?
            .parse()
            .map_err(|_| AppError::BadRequest(format!("{ACTOR_ID_HEADER} must be a user id")))?;

        let role_ids = header(ACTOR_ROLES_HEADER)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse()
                    .map_err(|_| AppError::BadRequest(format!("Invalid role id '{s}'")))
            })
            .collect::<Result<Vec<u64>, _>>()?;

        let is_guild_owner = header(ACTOR_GUILD_OWNER_HEADER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let guild_id = path_guild_id(parts, state).await?.unwrap_or_default();

        Ok(ActingUser(Actor {
            user_id,
            guild_id,
            role_ids,
            is_guild_owner,
        }))
    }
}

/// An acting user who may manage the guild named in the path. Rejects
/// with 403 Forbidden otherwise.
pub struct RequireGuildAdmin(pub Actor);

impl FromRequestParts<AppState> for RequireGuildAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ActingUser(actor) = ActingUser::from_request_parts(parts, state).await?;
        let guild_admins = state.admins.admins(actor.guild_id).await;
        if !state.admin_policy.is_admin(&actor, &guild_admins) {
            tracing::info!(
                user_id = actor.user_id,
                guild_id = actor.guild_id,
                "Admin command refused",
            );
            return Err(AppError::Core(CoreError::Forbidden(
                "You do not have permission to use this command.".into(),
            )));
        }
        Ok(RequireGuildAdmin(actor))
    }
}

async fn path_guild_id(parts: &mut Parts, state: &AppState) -> Result<Option<GuildId>, AppError> {
    let Ok(Path(params)) = Path::<HashMap<String, String>>::from_request_parts(parts, state).await
    else {
        return Ok(None);
    };
    params
        .get("guild_id")
        .map(|raw| {
            raw.parse()
                .map_err(|_| AppError::BadRequest(format!("Invalid guild id '{raw}'")))
        })
        .transpose()
}
