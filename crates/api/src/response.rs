//! Response envelope and wire DTOs shared by handlers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use comfybot_core::canvas::{CanvasMetadata, CanvasSnapshot};
use comfybot_core::command::CommandKind;
use comfybot_core::types::JobId;
use comfybot_pipeline::canvas::CanvasOutcome;
use comfybot_pipeline::templates::ResolvedSettings;
use comfybot_pipeline::{GenerationOutcome, SavedImage};

use crate::error::AppError;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// An output image, base64 encoded.
#[derive(Debug, Serialize)]
pub struct ImageDto {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    /// Base64 (standard alphabet, padded).
    pub data: String,
}

impl From<&SavedImage> for ImageDto {
    fn from(image: &SavedImage) -> Self {
        Self {
            filename: image.filename.clone(),
            width: image.width,
            height: image.height,
            data: STANDARD.encode(&image.bytes),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerationDto {
    pub job_id: JobId,
    pub command: CommandKind,
    pub prompt_id: Option<String>,
    pub settings: ResolvedSettings,
    pub duration_ms: u64,
    pub images: Vec<ImageDto>,
}

impl From<&GenerationOutcome> for GenerationDto {
    fn from(outcome: &GenerationOutcome) -> Self {
        Self {
            job_id: outcome.job_id,
            command: outcome.kind,
            prompt_id: outcome.prompt_id.clone(),
            settings: outcome.settings.clone(),
            duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            images: outcome.images.iter().map(ImageDto::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CanvasDto {
    pub metadata: CanvasMetadata,
    /// Current canvas PNG, base64.
    pub image: String,
}

impl From<&CanvasSnapshot> for CanvasDto {
    fn from(snapshot: &CanvasSnapshot) -> Self {
        Self {
            metadata: snapshot.metadata.clone(),
            image: STANDARD.encode(&snapshot.image),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CanvasEditDto {
    pub metadata: CanvasMetadata,
    pub generation: GenerationDto,
}

impl From<&CanvasOutcome> for CanvasEditDto {
    fn from(outcome: &CanvasOutcome) -> Self {
        Self {
            metadata: outcome.metadata.clone(),
            generation: GenerationDto::from(&outcome.generation),
        }
    }
}

/// Decode an optional base64 image field. Empty strings count as absent.
pub fn decode_image(field: &str, value: Option<&str>) -> Result<Option<Vec<u8>>, AppError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(encoded) => STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| AppError::BadRequest(format!("{field} is not valid base64: {e}"))),
    }
}
