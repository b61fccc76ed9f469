//! Collaborative canvas state and mask compositing.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{GuildId, JobId, Timestamp, UserId};

/// One accepted contribution to a canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasEdit {
    pub revision: u64,
    pub user_id: UserId,
    pub prompt: String,
    pub job_id: JobId,
    pub at: Timestamp,
}

/// Everything about a guild's canvas except the pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasMetadata {
    pub guild_id: GuildId,
    /// Starts at 0 and increases by one per committed edit.
    pub revision: u64,
    pub started_by: UserId,
    pub initial_prompt: String,
    pub width: u32,
    pub height: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Append-only.
    pub history: Vec<CanvasEdit>,
}

impl CanvasMetadata {
    pub fn new(
        guild_id: GuildId,
        started_by: UserId,
        initial_prompt: impl Into<String>,
        (width, height): (u32, u32),
        now: Timestamp,
    ) -> Self {
        Self {
            guild_id,
            revision: 0,
            started_by,
            initial_prompt: initial_prompt.into(),
            width,
            height,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    /// Metadata for the next revision with `edit` appended. `self` is left
    /// untouched so a failed commit keeps the previous state.
    pub fn with_edit(&self, user_id: UserId, prompt: &str, job_id: JobId, at: Timestamp) -> Self {
        let mut next = self.clone();
        next.revision += 1;
        next.updated_at = at;
        next.history.push(CanvasEdit {
            revision: next.revision,
            user_id,
            prompt: prompt.to_string(),
            job_id,
            at,
        });
        next
    }
}

/// A canvas as returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasSnapshot {
    pub metadata: CanvasMetadata,
    pub image: Vec<u8>,
}

fn decode(bytes: &[u8], what: &str) -> Result<DynamicImage, CoreError> {
    image::load_from_memory(bytes)
        .map_err(|e| CoreError::Validation(format!("Unreadable {what} image: {e}")))
}

/// Blend `generated` over `canvas` through `mask`.
///
/// White mask pixels take the generated image, black keep the canvas, and
/// grey levels blend linearly. The generated image and mask are resized to
/// the canvas when their sizes differ. Returns PNG bytes at canvas size.
pub fn composite_masked(canvas: &[u8], generated: &[u8], mask: &[u8]) -> Result<Vec<u8>, CoreError> {
    let base: RgbaImage = decode(canvas, "canvas")?.to_rgba8();
    let (width, height) = base.dimensions();

    let mut generated: RgbaImage = decode(generated, "generated")?.to_rgba8();
    if generated.dimensions() != (width, height) {
        generated = imageops::resize(&generated, width, height, FilterType::Lanczos3);
    }
    let mut mask: GrayImage = decode(mask, "mask")?.to_luma8();
    if mask.dimensions() != (width, height) {
        mask = imageops::resize(&mask, width, height, FilterType::Triangle);
    }

    let mut out = base;
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let alpha = f32::from(mask.get_pixel(x, y)[0]) / 255.0;
        if alpha <= 0.0 {
            continue;
        }
        let top = generated.get_pixel(x, y);
        for c in 0..4 {
            let blended = f32::from(pixel[c]) * (1.0 - alpha) + f32::from(top[c]) * alpha;
            pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }

    let mut encoded = Cursor::new(Vec::new());
    out.write_to(&mut encoded, ImageFormat::Png)
        .map_err(|e| CoreError::Internal(format!("Failed to encode canvas: {e}")))?;
    Ok(encoded.into_inner())
}
