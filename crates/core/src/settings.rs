//! Generation defaults and hard limits.
//!
//! The values here mirror the environment defaults documented in
//! `comfybot-api`'s configuration table. They are plain data so the
//! parameterization and admission code can be tested without touching the
//! environment.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_STEPS: u32 = 35;
pub const DEFAULT_CFG: f64 = 4.0;
pub const DEFAULT_SAMPLER: &str = "dpmpp_2m_sde";
pub const DEFAULT_SCHEDULER: &str = "exponential";
pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 1024;
pub const DEFAULT_BATCH_SIZE: u32 = 1;
pub const DEFAULT_PROMPT_PREFIX: &str = "embedding:SimplePositiveXLv2,";
pub const DEFAULT_NEGATIVE_PROMPT: &str = "embedding:DeepNegative_xl_v1";
pub const DEFAULT_COLORIZE_METHOD: &str = "Spectral";
pub const DEFAULT_ANIMATION_FRAMES: u32 = 5;
/// Delay between animation frames.
pub const DEFAULT_FRAME_MS: u32 = 500;

/// Positive prompt used when the requester supplied only options.
pub const FALLBACK_PROMPT: &str = "enhance";

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 3000;
pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 2048 * 2048;
pub const DEFAULT_MAX_BATCH_SIZE: u32 = 5;
pub const DEFAULT_VRAM_THRESHOLD_GB: f64 = 20.0;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;
pub const DEFAULT_MAX_PENDING_PER_USER: usize = 5;

/// Sampler defaults applied when neither the request nor the model profile
/// sets a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    pub steps: u32,
    pub cfg: f64,
    pub sampler_name: String,
    pub scheduler: String,
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    pub prompt_prefix: String,
    pub negative_prompt: String,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            cfg: DEFAULT_CFG,
            sampler_name: DEFAULT_SAMPLER.to_string(),
            scheduler: DEFAULT_SCHEDULER.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            batch_size: DEFAULT_BATCH_SIZE,
            prompt_prefix: DEFAULT_PROMPT_PREFIX.to_string(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
        }
    }
}

/// What to do when the backend resource check itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCheckPolicy {
    /// Reject the job rather than risk overloading the backend.
    FailClosed,
    /// Admit the job as if the backend had headroom.
    FailOpen,
}

impl Default for ResourceCheckPolicy {
    fn default() -> Self {
        Self::FailClosed
    }
}

impl std::str::FromStr for ResourceCheckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_closed" | "closed" => Ok(Self::FailClosed),
            "fail_open" | "open" => Ok(Self::FailOpen),
            other => Err(format!(
                "unknown resource check policy '{other}' (expected fail_closed or fail_open)"
            )),
        }
    }
}

/// Ceilings enforced by the admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationLimits {
    /// Maximum width or height of a requested output or a supplied image.
    pub max_image_dimension: u32,
    /// Maximum width x height of a requested output.
    pub max_image_pixels: u64,
    pub max_batch_size: u32,
    /// Reject when the backend reports more VRAM in use than this.
    pub vram_threshold_gb: f64,
    pub check_policy: ResourceCheckPolicy,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            vram_threshold_gb: DEFAULT_VRAM_THRESHOLD_GB,
            check_policy: ResourceCheckPolicy::default(),
        }
    }
}
