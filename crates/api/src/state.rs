use std::sync::Arc;

use comfybot_core::auth::AdminPolicy;
use comfybot_db::stores::AdminStore;
use comfybot_pipeline::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone; everything lives behind an `Arc` or is `Copy`.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Stats database (same pool the orchestrator records into).
    pub pool: comfybot_db::DbPool,
    pub admins: Arc<AdminStore>,
    pub admin_policy: AdminPolicy,
    pub config: Arc<ServerConfig>,
    pub event_bus: Arc<comfybot_events::EventBus>,
}
