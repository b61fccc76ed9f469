use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use comfybot_core::error::{CoreError, GenerationError};
use comfybot_db::stores::StoreError;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce `{ "error", "code" }` bodies.
/// Internal failures are logged with their detail and answered with a
/// generic message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A generation outcome other than success.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// A domain-level error from `comfybot_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Generation(err) => classify_generation_error(err),

            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::Internal(msg) => internal(msg),
            },

            AppError::Database(err) => internal(&err.to_string()),
            AppError::Store(err) => internal(&err.to_string()),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map a generation outcome to status, code and requester-facing message.
fn classify_generation_error(err: &GenerationError) -> (StatusCode, &'static str, String) {
    let code = err.code();
    match err {
        GenerationError::Parameter(msg) => (StatusCode::BAD_REQUEST, code, msg.clone()),
        GenerationError::AdmissionRejected(_) => {
            (StatusCode::TOO_MANY_REQUESTS, code, err.to_string())
        }
        GenerationError::BackendUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            code,
            "The image generation service is unavailable. Please try again later.".to_string(),
        ),
        GenerationError::TimedOut { .. } => (StatusCode::GATEWAY_TIMEOUT, code, err.to_string()),
        GenerationError::Cancelled(_) | GenerationError::DuplicateJob(_) => {
            (StatusCode::CONFLICT, code, err.to_string())
        }
        GenerationError::Failed(_) => (StatusCode::BAD_GATEWAY, code, err.to_string()),
        GenerationError::Template(_)
        | GenerationError::ArtifactMissing { .. }
        | GenerationError::Storage(_) => {
            tracing::error!(code, error = %err, "Generation failed internally");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "An internal error occurred".to_string(),
            )
        }
    }
}

fn internal(detail: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %detail, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
