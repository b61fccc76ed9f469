//! Model catalog: user-facing model keys mapped to checkpoint files and
//! optional per-model sampling profiles.
//!
//! Catalog documents are JSON (or YAML, handled by the loader) objects
//! where each value is either a bare checkpoint file name or a profile:
//!
//! ```json
//! {
//!   "default": "sdxl",
//!   "models": {
//!     "sdxl": "sd_xl_base_1.0.safetensors",
//!     "uncanny": {
//!       "file": "uncannyValley_v3.safetensors",
//!       "cfg": 2.2,
//!       "sampler_name": "euler_ancestral",
//!       "scheduler": "sgm_uniform"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Built-in fallback when no catalog file is configured.
pub const BUILTIN_MODEL_KEY: &str = "sdxl";
pub const BUILTIN_MODEL_FILE: &str = "sd_xl_base_1.0.safetensors";

/// Sampling profile attached to one checkpoint.
///
/// Profile values replace the global defaults for this model; options the
/// requester passes explicitly still win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
}

impl ModelProfile {
    pub fn file_only(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            prompt_prefix: None,
            negative_prompt: None,
            cfg: None,
            sampler_name: None,
            scheduler: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelEntry {
    File(String),
    Profile(ModelProfile),
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    default: String,
    models: BTreeMap<String, ModelEntry>,
}

/// Immutable set of selectable models.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    default_model: String,
    models: BTreeMap<String, ModelProfile>,
}

impl ModelCatalog {
    /// Build a catalog. Keys are matched case-insensitively.
    pub fn new(
        default_model: &str,
        models: impl IntoIterator<Item = (String, ModelProfile)>,
    ) -> Result<Self, CoreError> {
        let models: BTreeMap<String, ModelProfile> = models
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        if models.is_empty() {
            return Err(CoreError::Validation(
                "Model catalog must contain at least one model".to_string(),
            ));
        }
        if let Some((key, _)) = models.iter().find(|(_, p)| p.file.trim().is_empty()) {
            return Err(CoreError::Validation(format!(
                "Model '{key}' has an empty checkpoint file name"
            )));
        }
        let default_model = default_model.trim().to_lowercase();
        if !models.contains_key(&default_model) {
            return Err(CoreError::Validation(format!(
                "Default model '{default_model}' is not in the catalog"
            )));
        }
        Ok(Self {
            default_model,
            models,
        })
    }

    /// Parse a catalog document.
    ///
    /// `default_override` (from `DEFAULT_MODEL`) replaces the document's
    /// `default` key when set.
    pub fn from_json_value(
        value: serde_json::Value,
        default_override: Option<&str>,
    ) -> Result<Self, CoreError> {
        let doc: CatalogDocument = serde_json::from_value(value)
            .map_err(|e| CoreError::Validation(format!("Invalid model catalog: {e}")))?;
        let models = doc.models.into_iter().map(|(key, entry)| {
            let profile = match entry {
                ModelEntry::File(file) => ModelProfile::file_only(file),
                ModelEntry::Profile(profile) => profile,
            };
            (key, profile)
        });
        Self::new(default_override.unwrap_or(&doc.default), models)
    }

    /// Single-model catalog used when no catalog file is configured.
    pub fn builtin() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            BUILTIN_MODEL_KEY.to_string(),
            ModelProfile::file_only(BUILTIN_MODEL_FILE),
        );
        Self {
            default_model: BUILTIN_MODEL_KEY.to_string(),
            models,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn get(&self, key: &str) -> Option<&ModelProfile> {
        self.models.get(&key.trim().to_lowercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Model keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelProfile)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }
}
