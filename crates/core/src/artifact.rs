//! Generated images returned to the requester.

use std::io::Cursor;

use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{Delay, Frame, ImageReader};

use crate::error::CoreError;
use crate::types::JobId;

/// Read `(width, height)` from an encoded image without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), CoreError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CoreError::Validation(format!("Unreadable image: {e}")))?
        .into_dimensions()
        .map_err(|e| CoreError::Validation(format!("Unsupported image: {e}")))
}

/// Assemble encoded frames into a looping GIF, `frame_ms` per frame.
///
/// Frames are resized to the first frame's size.
pub fn encode_gif(frames: &[Vec<u8>], frame_ms: u32) -> Result<ArtifactImage, CoreError> {
    let mut size = None;
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| CoreError::Internal(format!("Failed to start animation: {e}")))?;
        for (index, bytes) in frames.iter().enumerate() {
            let mut rgba = image::load_from_memory(bytes)
                .map_err(|e| CoreError::Validation(format!("Unreadable frame {}: {e}", index + 1)))?
                .to_rgba8();
            let (width, height) = *size.get_or_insert(rgba.dimensions());
            if rgba.dimensions() != (width, height) {
                rgba = imageops::resize(&rgba, width, height, FilterType::Triangle);
            }
            let delay = Delay::from_numer_denom_ms(frame_ms, 1);
            encoder
                .encode_frame(Frame::from_parts(rgba, 0, 0, delay))
                .map_err(|e| CoreError::Internal(format!("Failed to encode frame {}: {e}", index + 1)))?;
        }
    }

    let (width, height) =
        size.ok_or_else(|| CoreError::Validation("An animation needs at least one frame".into()))?;
    Ok(ArtifactImage {
        filename: "animation.gif".to_string(),
        bytes: out,
        width,
        height,
    })
}

/// One encoded output image.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactImage {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ArtifactImage {
    /// Wrap encoded bytes, probing their dimensions.
    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self, CoreError> {
        let (width, height) = image_dimensions(&bytes)?;
        Ok(Self {
            filename: filename.into(),
            bytes,
            width,
            height,
        })
    }
}

/// Every image one job produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub job_id: JobId,
    pub images: Vec<ArtifactImage>,
}

impl Artifact {
    pub fn new(job_id: JobId, images: Vec<ArtifactImage>) -> Self {
        Self { job_id, images }
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// First image, used by single-output commands such as canvas edits.
    pub fn first(&self) -> Option<&ArtifactImage> {
        self.images.first()
    }
}
