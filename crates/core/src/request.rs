//! The immutable generation request handed from the dispatcher to the core.

use chrono::Utc;

use crate::command::CommandKind;
use crate::error::GenerationError;
use crate::options::{parse_command_text, GenerationOptions};
use crate::types::{new_job_id, GuildId, JobId, Timestamp, UserId};

/// One user command, fully parsed. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub job_id: JobId,
    pub user_id: UserId,
    pub username: String,
    pub guild_id: GuildId,
    pub kind: CommandKind,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub source_image: Option<Vec<u8>>,
    pub mask_image: Option<Vec<u8>>,
    pub options: GenerationOptions,
    pub submitted_at: Timestamp,
}

/// Builder input; everything the dispatcher knows about a command.
#[derive(Debug, Clone, Default)]
pub struct RequestInput {
    pub user_id: UserId,
    pub username: String,
    pub guild_id: GuildId,
    /// Free-form command text (`prompt key:value ... neg: ...`).
    pub text: String,
    /// Already-typed options merged over the ones parsed from `text`.
    pub options: Option<GenerationOptions>,
    pub source_image: Option<Vec<u8>>,
    pub mask_image: Option<Vec<u8>>,
}

impl GenerationRequest {
    /// Parse and validate `input` for `kind`, allocating a fresh job id.
    ///
    /// Fails with [`GenerationError::Parameter`] for bad options or a
    /// missing source/mask image.
    pub fn build(kind: CommandKind, input: RequestInput) -> Result<Self, GenerationError> {
        let parsed = parse_command_text(kind, &input.text)?;
        let mut options = match input.options {
            Some(typed) => merge_options(parsed.options, typed),
            None => parsed.options,
        };
        options.validate(kind)?;

        if kind.needs_source_image() && input.source_image.as_deref().is_none_or(<[u8]>::is_empty)
        {
            return Err(GenerationError::Parameter(format!(
                "{kind} requires a source image"
            )));
        }
        if kind.needs_mask() && input.mask_image.as_deref().is_none_or(<[u8]>::is_empty) {
            return Err(GenerationError::Parameter(format!(
                "{kind} requires a mask image (white marks the area to regenerate)"
            )));
        }

        Ok(Self {
            job_id: new_job_id(),
            user_id: input.user_id,
            username: input.username,
            guild_id: input.guild_id,
            kind,
            prompt: parsed.prompt,
            negative_prompt: parsed.negative_prompt,
            source_image: input.source_image,
            mask_image: input.mask_image,
            options,
            submitted_at: Utc::now(),
        })
    }
}

/// Typed fields win over text-parsed fields when both are present.
fn merge_options(text: GenerationOptions, typed: GenerationOptions) -> GenerationOptions {
    GenerationOptions {
        steps: typed.steps.or(text.steps),
        cfg: typed.cfg.or(text.cfg),
        batch: typed.batch.or(text.batch),
        hires: typed.hires || text.hires,
        width: typed.width.or(text.width),
        height: typed.height.or(text.height),
        model: typed.model.map(|m| m.to_lowercase()).or(text.model),
        no_negative: typed.no_negative || text.no_negative,
        sampler_name: typed.sampler_name.map(|s| s.to_lowercase()).or(text.sampler_name),
        scheduler: typed.scheduler.map(|s| s.to_lowercase()).or(text.scheduler),
        seed: typed.seed.or(text.seed),
        colorize: typed.colorize || text.colorize,
        colorize_method: typed.colorize_method.or(text.colorize_method),
        frames: typed.frames.or(text.frames),
        speed: typed.speed.or(text.speed),
    }
}
