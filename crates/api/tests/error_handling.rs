//! `AppError` to HTTP response mapping.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use uuid::Uuid;

use comfybot_api::error::AppError;
use comfybot_core::error::{CoreError, GenerationError};

async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn parameter_error_keeps_its_message() {
    let err = AppError::from(GenerationError::Parameter("steps must be between 1 and 100".into()));
    let (status, json) = error_to_response(err).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "PARAMETER_ERROR");
    assert_eq!(json["error"], "steps must be between 1 and 100");
}

#[tokio::test]
async fn generation_outcomes_map_to_statuses() {
    let job_id = Uuid::now_v7();
    let cases = [
        (GenerationError::AdmissionRejected("busy".into()), StatusCode::TOO_MANY_REQUESTS),
        (GenerationError::BackendUnavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
        (GenerationError::TimedOut { job_id, timeout_secs: 120 }, StatusCode::GATEWAY_TIMEOUT),
        (GenerationError::Cancelled(job_id), StatusCode::CONFLICT),
        (GenerationError::Failed("CUDA out of memory".into()), StatusCode::BAD_GATEWAY),
    ];
    for (err, expected) in cases {
        let code = err.code();
        let (status, json) = error_to_response(AppError::from(err)).await;
        assert_eq!(status, expected);
        assert_eq!(json["code"], code);
    }
}

#[tokio::test]
async fn internal_generation_errors_are_sanitized() {
    let job_id = Uuid::now_v7();
    for err in [
        GenerationError::Template("txt2img_workflow: node '3' is missing 'class_type'".into()),
        GenerationError::ArtifactMissing { job_id, detail: "404".into() },
        GenerationError::Storage("/var/lib/comfybot: permission denied".into()),
    ] {
        let code = err.code();
        let (status, json) = error_to_response(AppError::from(err)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], code);
        assert_eq!(json["error"], "An internal error occurred");
    }
}

#[tokio::test]
async fn backend_unavailable_hides_detail() {
    let err = AppError::from(GenerationError::BackendUnavailable("connection refused to 10.0.0.5".into()));
    let (_, json) = error_to_response(err).await;
    assert!(!json["error"].as_str().unwrap().contains("10.0.0.5"));
}

#[tokio::test]
async fn core_errors_map_like_crud_errors() {
    let (status, json) = error_to_response(AppError::Core(CoreError::NotFound {
        entity: "Canvas for guild",
        id: "7".into(),
    }))
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Canvas for guild 7 not found");

    let (status, _) = error_to_response(AppError::Core(CoreError::Forbidden("no".into()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = error_to_response(AppError::InternalError("secret".into())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "An internal error occurred");
}
