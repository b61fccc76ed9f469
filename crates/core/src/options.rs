//! Typed generation options and the free-form command text parser.
//!
//! Requesters write options inline, e.g. `draw a cat steps:50 hr:yes neg:blurry`.
//! Each recognized key maps to one field of [`GenerationOptions`]; every
//! command kind accepts an explicit subset of keys. Unknown keys and keys
//! the kind does not accept are rejected instead of being left in the prompt.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::command::{CommandKind, TemplateVariant};
use crate::error::GenerationError;
use crate::settings::{
    GenerationDefaults, DEFAULT_ANIMATION_FRAMES, DEFAULT_COLORIZE_METHOD, DEFAULT_FRAME_MS,
    FALLBACK_PROMPT,
};

// ---------------------------------------------------------------------------
// Ranges and vocabularies
// ---------------------------------------------------------------------------

pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 150;
pub const MAX_CFG: f64 = 30.0;
pub const MIN_DIMENSION: u32 = 64;
/// Latent space works in 8-pixel blocks.
pub const DIMENSION_STEP: u32 = 8;
pub const MAX_ANIMATION_FRAMES: u32 = 10;
pub const MIN_FRAME_MS: u32 = 50;
pub const MAX_FRAME_MS: u32 = 2000;

/// Samplers the backend ships with.
pub const KNOWN_SAMPLERS: &[&str] = &[
    "euler",
    "euler_ancestral",
    "heun",
    "heunpp2",
    "dpm_2",
    "dpm_2_ancestral",
    "lms",
    "dpm_fast",
    "dpm_adaptive",
    "dpmpp_2s_ancestral",
    "dpmpp_sde",
    "dpmpp_sde_gpu",
    "dpmpp_2m",
    "dpmpp_2m_sde",
    "dpmpp_2m_sde_gpu",
    "dpmpp_3m_sde",
    "dpmpp_3m_sde_gpu",
    "ddpm",
    "lcm",
    "ddim",
    "uni_pc",
    "uni_pc_bh2",
];

/// Noise schedulers the backend ships with.
pub const KNOWN_SCHEDULERS: &[&str] = &[
    "normal",
    "karras",
    "exponential",
    "sgm_uniform",
    "simple",
    "ddim_uniform",
    "beta",
];

/// Color maps accepted by the depth colorize node.
pub const VALID_COLORIZE_METHODS: &[&str] = &[
    "Spectral",
    "terrain",
    "viridis",
    "plasma",
    "inferno",
    "magma",
    "cividis",
    "twilight",
    "rainbow",
    "gist_rainbow",
    "gist_ncar",
    "gist_earth",
    "turbo",
    "jet",
    "afmhot",
    "copper",
    "seismic",
    "hsv",
    "brg",
];

// ---------------------------------------------------------------------------
// Option keys
// ---------------------------------------------------------------------------

/// Every option key a requester may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    Steps,
    Cfg,
    Batch,
    Hires,
    Width,
    Height,
    Model,
    NoNegative,
    SamplerName,
    Scheduler,
    Seed,
    Colorize,
    Method,
    Frames,
    Speed,
}

impl OptionKey {
    pub const ALL: [OptionKey; 15] = [
        OptionKey::Steps,
        OptionKey::Cfg,
        OptionKey::Batch,
        OptionKey::Hires,
        OptionKey::Width,
        OptionKey::Height,
        OptionKey::Model,
        OptionKey::NoNegative,
        OptionKey::SamplerName,
        OptionKey::Scheduler,
        OptionKey::Seed,
        OptionKey::Colorize,
        OptionKey::Method,
        OptionKey::Frames,
        OptionKey::Speed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Steps => "steps",
            Self::Cfg => "cfg",
            Self::Batch => "batch",
            Self::Hires => "hr",
            Self::Width => "width",
            Self::Height => "height",
            Self::Model => "model",
            Self::NoNegative => "noneg",
            Self::SamplerName => "sampler_name",
            Self::Scheduler => "scheduler",
            Self::Seed => "seed",
            Self::Colorize => "colorize",
            Self::Method => "method",
            Self::Frames => "frames",
            Self::Speed => "speed",
        }
    }

    /// Look up a key by the name a requester typed (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower == "sampler" {
            return Some(Self::SamplerName);
        }
        Self::ALL.into_iter().find(|k| k.name() == lower)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Steps => "Number of sampling steps (higher = more detail, slower)",
            Self::Cfg => "Classifier-free guidance scale",
            Self::Batch => "Number of images to generate",
            Self::Hires => "Enable high-resolution two-pass output (yes/no)",
            Self::Width => "Width of the generated image",
            Self::Height => "Height of the generated image",
            Self::Model => "Model to use (see the model catalog)",
            Self::NoNegative => "Disable the negative prompt (true/false)",
            Self::SamplerName => "Sampling algorithm",
            Self::Scheduler => "Noise scheduler for sampling",
            Self::Seed => "Fixed sampler seed (random when omitted)",
            Self::Colorize => "Render the depth map through a color map (yes/no)",
            Self::Method => "Color map for colorized depth maps",
            Self::Frames => "Number of animation frames",
            Self::Speed => "Milliseconds each animation frame is shown",
        }
    }

    /// Whether `kind` accepts this key.
    pub fn allowed_for(self, kind: CommandKind) -> bool {
        use OptionKey::*;
        match kind {
            CommandKind::Text2Img => matches!(
                self,
                Steps
                    | Cfg
                    | Batch
                    | Hires
                    | Width
                    | Height
                    | Model
                    | NoNegative
                    | SamplerName
                    | Scheduler
                    | Seed
            ),
            CommandKind::Img2Img => matches!(
                self,
                Steps | Cfg | Hires | Model | NoNegative | SamplerName | Scheduler | Seed
            ),
            CommandKind::Inpaint | CommandKind::CanvasEdit => {
                matches!(self, Steps | Cfg | Model | NoNegative | Seed)
            }
            CommandKind::Depth => matches!(self, Colorize | Method),
            CommandKind::Upscale => false,
            CommandKind::Animate => matches!(
                self,
                Steps
                    | Cfg
                    | Width
                    | Height
                    | Model
                    | NoNegative
                    | SamplerName
                    | Scheduler
                    | Seed
                    | Frames
                    | Speed
            ),
        }
    }

    /// Keys accepted by `kind`, in display order.
    pub fn accepted_by(kind: CommandKind) -> Vec<OptionKey> {
        Self::ALL
            .into_iter()
            .filter(|k| k.allowed_for(kind))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Typed options
// ---------------------------------------------------------------------------

/// Explicit overrides supplied with a request. `None` / `false` means
/// "use the default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationOptions {
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub batch: Option<u32>,
    pub hires: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub model: Option<String>,
    pub no_negative: bool,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub seed: Option<u64>,
    pub colorize: bool,
    pub colorize_method: Option<String>,
    pub frames: Option<u32>,
    /// Animation frame delay in milliseconds.
    pub speed: Option<u32>,
}

impl GenerationOptions {
    /// Keys that carry a non-default value.
    pub fn set_keys(&self) -> Vec<OptionKey> {
        let mut keys = Vec::new();
        let mut push = |present: bool, key: OptionKey| {
            if present {
                keys.push(key);
            }
        };
        push(self.steps.is_some(), OptionKey::Steps);
        push(self.cfg.is_some(), OptionKey::Cfg);
        push(self.batch.is_some(), OptionKey::Batch);
        push(self.hires, OptionKey::Hires);
        push(self.width.is_some(), OptionKey::Width);
        push(self.height.is_some(), OptionKey::Height);
        push(self.model.is_some(), OptionKey::Model);
        push(self.no_negative, OptionKey::NoNegative);
        push(self.sampler_name.is_some(), OptionKey::SamplerName);
        push(self.scheduler.is_some(), OptionKey::Scheduler);
        push(self.seed.is_some(), OptionKey::Seed);
        push(self.colorize, OptionKey::Colorize);
        push(self.colorize_method.is_some(), OptionKey::Method);
        push(self.frames.is_some(), OptionKey::Frames);
        push(self.speed.is_some(), OptionKey::Speed);
        keys
    }

    /// Assign one raw `key:value` pair. Only type conversion happens here;
    /// range checks run in [`validate`](Self::validate).
    pub fn set(&mut self, key: OptionKey, raw: &str) -> Result<(), GenerationError> {
        let raw = raw.trim();
        match key {
            OptionKey::Steps => self.steps = Some(parse_number(key, raw)?),
            OptionKey::Cfg => self.cfg = Some(parse_number(key, raw)?),
            OptionKey::Batch => self.batch = Some(parse_number(key, raw)?),
            OptionKey::Width => self.width = Some(parse_number(key, raw)?),
            OptionKey::Height => self.height = Some(parse_number(key, raw)?),
            OptionKey::Seed => self.seed = Some(parse_number(key, raw)?),
            OptionKey::Frames => self.frames = Some(parse_number(key, raw)?),
            OptionKey::Speed => self.speed = Some(parse_number(key, raw)?),
            OptionKey::Hires => self.hires = parse_flag(key, raw)?,
            OptionKey::NoNegative => self.no_negative = parse_flag(key, raw)?,
            OptionKey::Colorize => self.colorize = parse_flag(key, raw)?,
            OptionKey::Model => self.model = Some(raw.to_lowercase()),
            OptionKey::SamplerName => self.sampler_name = Some(raw.to_lowercase()),
            OptionKey::Scheduler => self.scheduler = Some(raw.to_lowercase()),
            OptionKey::Method => self.colorize_method = Some(raw.to_string()),
        }
        Ok(())
    }

    /// Check that every set key is accepted by `kind` and every value is in
    /// range. Model existence is checked against the catalog later, during
    /// parameterization.
    pub fn validate(&mut self, kind: CommandKind) -> Result<(), GenerationError> {
        for key in self.set_keys() {
            if !key.allowed_for(kind) {
                return Err(GenerationError::Parameter(format!(
                    "Option '{}' is not supported by {kind}. Supported: {}",
                    key.name(),
                    display_keys(&OptionKey::accepted_by(kind)),
                )));
            }
        }

        if let Some(steps) = self.steps {
            if !(MIN_STEPS..=MAX_STEPS).contains(&steps) {
                return Err(GenerationError::Parameter(format!(
                    "steps must be between {MIN_STEPS} and {MAX_STEPS}, got {steps}"
                )));
            }
        }
        if let Some(cfg) = self.cfg {
            if !cfg.is_finite() || cfg <= 0.0 || cfg > MAX_CFG {
                return Err(GenerationError::Parameter(format!(
                    "cfg must be greater than 0 and at most {MAX_CFG}, got {cfg}"
                )));
            }
        }
        if let Some(batch) = self.batch {
            if batch == 0 {
                return Err(GenerationError::Parameter(
                    "batch must be at least 1".to_string(),
                ));
            }
        }
        if let Some(frames) = self.frames {
            if !(1..=MAX_ANIMATION_FRAMES).contains(&frames) {
                return Err(GenerationError::Parameter(format!(
                    "frames must be between 1 and {MAX_ANIMATION_FRAMES}, got {frames}"
                )));
            }
        }
        if let Some(speed) = self.speed {
            if !(MIN_FRAME_MS..=MAX_FRAME_MS).contains(&speed) {
                return Err(GenerationError::Parameter(format!(
                    "speed must be between {MIN_FRAME_MS} and {MAX_FRAME_MS} ms, got {speed}"
                )));
            }
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if let Some(v) = value {
                if v < MIN_DIMENSION || v % DIMENSION_STEP != 0 {
                    return Err(GenerationError::Parameter(format!(
                        "{name} must be at least {MIN_DIMENSION} and a multiple of {DIMENSION_STEP}, got {v}"
                    )));
                }
            }
        }
        if let Some(model) = &self.model {
            if model.is_empty() {
                return Err(GenerationError::Parameter(
                    "model must not be empty".to_string(),
                ));
            }
        }
        if let Some(sampler) = &self.sampler_name {
            if !KNOWN_SAMPLERS.contains(&sampler.as_str()) {
                return Err(GenerationError::Parameter(format!(
                    "Unknown sampler '{sampler}'. Available: {}",
                    KNOWN_SAMPLERS.join(", ")
                )));
            }
        }
        if let Some(scheduler) = &self.scheduler {
            if !KNOWN_SCHEDULERS.contains(&scheduler.as_str()) {
                return Err(GenerationError::Parameter(format!(
                    "Unknown scheduler '{scheduler}'. Available: {}",
                    KNOWN_SCHEDULERS.join(", ")
                )));
            }
        }
        if let Some(method) = &self.colorize_method {
            let canonical = VALID_COLORIZE_METHODS
                .iter()
                .find(|m| m.eq_ignore_ascii_case(method))
                .ok_or_else(|| {
                    GenerationError::Parameter(format!(
                        "Invalid method '{method}'. Available: {}",
                        VALID_COLORIZE_METHODS.join(", ")
                    ))
                })?;
            self.colorize_method = Some((*canonical).to_string());
        }
        Ok(())
    }

    /// Which template shape these options select for `kind`.
    pub fn template_variant(&self, kind: CommandKind) -> TemplateVariant {
        match kind {
            CommandKind::Text2Img | CommandKind::Img2Img if self.hires => TemplateVariant::Hires,
            CommandKind::Depth if self.colorize => TemplateVariant::Colorized,
            _ => TemplateVariant::Standard,
        }
    }

    pub fn colorize_method_or_default(&self) -> &str {
        self.colorize_method
            .as_deref()
            .unwrap_or(DEFAULT_COLORIZE_METHOD)
    }

    pub fn frames_or_default(&self) -> u32 {
        self.frames.unwrap_or(DEFAULT_ANIMATION_FRAMES)
    }

    pub fn speed_or_default(&self) -> u32 {
        self.speed.unwrap_or(DEFAULT_FRAME_MS)
    }
}

fn parse_number<T: std::str::FromStr>(key: OptionKey, raw: &str) -> Result<T, GenerationError> {
    raw.parse::<T>().map_err(|_| {
        GenerationError::Parameter(format!("Invalid value '{raw}' for {}", key.name()))
    })
}

fn parse_flag(key: OptionKey, raw: &str) -> Result<bool, GenerationError> {
    match raw.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        _ => Err(GenerationError::Parameter(format!(
            "Invalid value '{raw}' for {} (expected yes/no)",
            key.name()
        ))),
    }
}

fn display_keys(keys: &[OptionKey]) -> String {
    if keys.is_empty() {
        return "none".to_string();
    }
    keys.iter().map(|k| k.name()).collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// Command text parsing
// ---------------------------------------------------------------------------

/// Result of splitting command text into prompt, negative prompt and options.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub options: GenerationOptions,
}

static OPTION_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]+):([^\s,:/()]+),?$").expect("valid regex"));

static NEGATIVE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[\s,])neg:").expect("valid regex"));

/// Prefixes that are ComfyUI prompt syntax rather than options.
const PROMPT_SYNTAX_PREFIXES: [&str; 1] = ["embedding"];

static COMMA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*,\s*").expect("valid regex"));

/// Parse free-form command text for `kind`.
///
/// * `key:value` tokens become typed options; unknown or disallowed keys
///   are a [`GenerationError::Parameter`]. `embedding:<name>` stays in the
///   prompt.
/// * Everything after `neg:` is the negative prompt.
/// * An empty positive prompt becomes `"enhance"`.
pub fn parse_command_text(kind: CommandKind, text: &str) -> Result<ParsedCommand, GenerationError> {
    let text = text.trim();
    let (positive_raw, negative_raw) = match NEGATIVE_MARKER_RE.find(text) {
        Some(m) => (&text[..m.start()], Some(&text[m.end()..])),
        None => (text, None),
    };

    let mut options = GenerationOptions::default();
    let positive = extract_options(positive_raw, &mut options)?;
    let negative = match negative_raw {
        Some(raw) => extract_options(raw, &mut options)?,
        None => String::new(),
    };
    options.validate(kind)?;

    let prompt = if positive.is_empty() {
        FALLBACK_PROMPT.to_string()
    } else {
        positive
    };
    let negative_prompt = (!negative.is_empty()).then_some(negative);

    Ok(ParsedCommand {
        prompt,
        negative_prompt,
        options,
    })
}

/// Remove option tokens from `segment`, assigning them into `options`, and
/// return the normalized remaining text.
fn extract_options(segment: &str, options: &mut GenerationOptions) -> Result<String, GenerationError> {
    let mut kept = Vec::new();
    for token in segment.split_whitespace() {
        match OPTION_TOKEN_RE.captures(token) {
            Some(caps) if is_prompt_syntax(&caps[1]) => kept.push(token),
            Some(caps) => {
                let name = &caps[1];
                let key = OptionKey::from_name(name).ok_or_else(|| {
                    GenerationError::Parameter(format!(
                        "Unknown option '{name}'. Known options: {}",
                        display_keys(&OptionKey::ALL)
                    ))
                })?;
                options.set(key, &caps[2])?;
            }
            None => kept.push(token),
        }
    }
    let joined = kept.join(" ");
    let normalized = COMMA_RE.replace_all(&joined, ", ");
    Ok(normalized.trim().trim_matches(',').trim().to_string())
}

fn is_prompt_syntax(name: &str) -> bool {
    PROMPT_SYNTAX_PREFIXES
        .iter()
        .any(|prefix| prefix.eq_ignore_ascii_case(name))
}

// ---------------------------------------------------------------------------
// Option catalog
// ---------------------------------------------------------------------------

/// One row of the user-facing option reference.
#[derive(Debug, Clone, Serialize)]
pub struct OptionInfo {
    pub key: &'static str,
    pub description: &'static str,
    pub default: serde_json::Value,
    pub commands: Vec<CommandKind>,
}

/// Describe every option together with its effective default.
pub fn option_catalog(defaults: &GenerationDefaults, default_model: &str) -> Vec<OptionInfo> {
    use serde_json::json;
    OptionKey::ALL
        .into_iter()
        .map(|key| {
            let default = match key {
                OptionKey::Steps => json!(defaults.steps),
                OptionKey::Cfg => json!(defaults.cfg),
                OptionKey::Batch => json!(defaults.batch_size),
                OptionKey::Hires => json!("no"),
                OptionKey::Width => json!(defaults.width),
                OptionKey::Height => json!(defaults.height),
                OptionKey::Model => json!(default_model),
                OptionKey::NoNegative => json!("false"),
                OptionKey::SamplerName => json!(defaults.sampler_name),
                OptionKey::Scheduler => json!(defaults.scheduler),
                OptionKey::Seed => json!("random"),
                OptionKey::Colorize => json!("no"),
                OptionKey::Method => json!(DEFAULT_COLORIZE_METHOD),
                OptionKey::Frames => json!(DEFAULT_ANIMATION_FRAMES),
                OptionKey::Speed => json!(DEFAULT_FRAME_MS),
            };
            OptionInfo {
                key: key.name(),
                description: key.description(),
                default,
                commands: CommandKind::ALL
                    .into_iter()
                    .filter(|kind| key.allowed_for(*kind))
                    .collect(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
