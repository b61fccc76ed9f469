pub mod health;

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::{admins, canvas, catalog, events, generation, stats};
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /catalog/models                         selectable models
/// /catalog/options                        option reference
/// /catalog/backends                       slot usage per backend
///
/// /generations                            run a generation (POST)
/// /generations/{job_id}                   withdraw a queued job (DELETE)
///
/// /events                                 job event stream (SSE)
///
/// /guilds/{guild_id}/canvas               show (GET), start (POST)
/// /guilds/{guild_id}/canvas/edits         add to canvas (POST)
/// /guilds/{guild_id}/stats/{user_id}      one user's counters
/// /guilds/{guild_id}/stats/reset          reset (POST, admin only)
/// /guilds/{guild_id}/leaderboard          top users (?top=N)
/// /guilds/{guild_id}/admins               list (admin only)
/// /guilds/{guild_id}/admins/{user_id}     add (PUT), remove (DELETE), admin only
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/catalog/models", get(catalog::list_models))
        .route("/catalog/options", get(catalog::list_options))
        .route("/catalog/backends", get(catalog::list_backends))
        .route("/generations", post(generation::create_generation))
        .route(
            "/generations/{job_id}",
            axum::routing::delete(generation::cancel_generation),
        )
        .route("/events", get(events::stream_events))
        .nest("/guilds/{guild_id}", guild_routes())
}

fn guild_routes() -> Router<AppState> {
    Router::new()
        .route("/canvas", get(canvas::show_canvas).post(canvas::start_canvas))
        .route("/canvas/edits", post(canvas::add_to_canvas))
        .route("/stats/reset", post(stats::reset_stats))
        .route("/stats/{user_id}", get(stats::get_user_stats))
        .route("/leaderboard", get(stats::get_leaderboard))
        .route("/admins", get(admins::list_admins))
        .route(
            "/admins/{user_id}",
            put(admins::add_admin).delete(admins::remove_admin),
        )
}
