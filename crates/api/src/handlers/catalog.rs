//! Read-only catalog endpoints: selectable models and generation options.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use comfybot_core::catalog::ModelProfile;
use comfybot_core::options::option_catalog;
use comfybot_pipeline::queue::BackendLoad;

use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ModelDto {
    pub key: String,
    pub is_default: bool,
    #[serde(flatten)]
    pub profile: ModelProfile,
}

#[derive(Debug, Serialize)]
pub struct BackendsResponse {
    pub max_concurrent_jobs: usize,
    pub backends: Vec<BackendLoad>,
}

/// GET /api/v1/catalog/models
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.orchestrator.catalog();
    let models: Vec<ModelDto> = catalog
        .iter()
        .map(|(key, profile)| ModelDto {
            key: key.to_string(),
            is_default: key == catalog.default_model(),
            profile: profile.clone(),
        })
        .collect();
    Json(DataResponse { data: models })
}

/// GET /api/v1/catalog/options
///
/// Every option with its description, effective default and the commands
/// that accept it.
pub async fn list_options(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let options = option_catalog(orchestrator.defaults(), orchestrator.catalog().default_model());
    Json(DataResponse { data: options })
}

/// GET /api/v1/catalog/backends
///
/// Current slot usage per backend.
pub async fn list_backends(State(state): State<AppState>) -> impl IntoResponse {
    Json(DataResponse {
        data: BackendsResponse {
            max_concurrent_jobs: state.config.max_concurrent_jobs,
            backends: state.orchestrator.backend_loads(),
        },
    })
}
