//! Command kinds and the template keys they resolve to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kinds of generation command the core accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    #[serde(rename = "text2img")]
    Text2Img,
    #[serde(rename = "img2img")]
    Img2Img,
    Upscale,
    Inpaint,
    Depth,
    CanvasEdit,
    /// Several text-to-image frames with consecutive seeds, played as a GIF.
    Animate,
}

impl CommandKind {
    pub const ALL: [CommandKind; 7] = [
        CommandKind::Text2Img,
        CommandKind::Img2Img,
        CommandKind::Upscale,
        CommandKind::Inpaint,
        CommandKind::Depth,
        CommandKind::CanvasEdit,
        CommandKind::Animate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text2Img => "text2img",
            Self::Img2Img => "img2img",
            Self::Upscale => "upscale",
            Self::Inpaint => "inpaint",
            Self::Depth => "depth",
            Self::CanvasEdit => "canvas_edit",
            Self::Animate => "animate",
        }
    }

    /// Whether the command operates on a caller-supplied source image.
    pub fn needs_source_image(self) -> bool {
        !self.chooses_size()
    }

    /// Whether the command picks its own output size instead of inheriting
    /// it from a source image.
    pub fn chooses_size(self) -> bool {
        matches!(self, Self::Text2Img | Self::Animate)
    }

    /// Whether the command needs a mask (white = area to regenerate).
    pub fn needs_mask(self) -> bool {
        matches!(self, Self::Inpaint | Self::CanvasEdit)
    }

    /// Whether the command samples from a checkpoint and therefore takes a
    /// prompt and a model.
    pub fn uses_model(self) -> bool {
        !matches!(self, Self::Upscale | Self::Depth)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alternate graph shapes for the same command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateVariant {
    Standard,
    /// Two-pass high-resolution sampling (`hr:yes`).
    Hires,
    /// Depth map rendered through a color map (`colorize:yes`).
    Colorized,
}

/// Identifies exactly one workflow template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateKey {
    pub kind: CommandKind,
    pub variant: TemplateVariant,
}

impl TemplateKey {
    pub fn new(kind: CommandKind, variant: TemplateVariant) -> Self {
        Self { kind, variant }
    }

    pub fn standard(kind: CommandKind) -> Self {
        Self::new(kind, TemplateVariant::Standard)
    }

    /// File stem under the workflows directory, e.g. `txt2img_hr_workflow`.
    ///
    /// Canvas edits share the inpaint graph.
    pub fn file_stem(&self) -> String {
        let base = match self.kind {
            CommandKind::Text2Img => "txt2img",
            CommandKind::Img2Img => "img2img",
            CommandKind::Upscale => "upscale",
            CommandKind::Inpaint | CommandKind::CanvasEdit => "inpaint",
            CommandKind::Depth => "depth",
            CommandKind::Animate => "animate",
        };
        match self.variant {
            TemplateVariant::Standard => format!("{base}_workflow"),
            TemplateVariant::Hires => format!("{base}_hr_workflow"),
            TemplateVariant::Colorized => format!("{base}_colorized_workflow"),
        }
    }

    /// Inverse of [`file_stem`](Self::file_stem). Returns every key a stem
    /// serves (the inpaint stem serves both inpaint and canvas edits).
    pub fn from_file_stem(stem: &str) -> Vec<TemplateKey> {
        let mut keys = Vec::new();
        for kind in CommandKind::ALL {
            for variant in [
                TemplateVariant::Standard,
                TemplateVariant::Hires,
                TemplateVariant::Colorized,
            ] {
                let key = TemplateKey::new(kind, variant);
                if key.file_stem() == stem {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}
