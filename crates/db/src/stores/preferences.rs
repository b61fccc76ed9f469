//! Last explicitly chosen model per user.

use std::collections::BTreeMap;
use std::path::PathBuf;

use comfybot_core::types::UserId;

use super::{JsonStore, StoreError};

/// `{ "<user_id>": "<model key>" }`
pub struct PreferenceStore {
    inner: JsonStore<BTreeMap<UserId, String>>,
}

impl PreferenceStore {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self {
            inner: JsonStore::load(path).await?,
        })
    }

    pub async fn model_for(&self, user_id: UserId) -> Option<String> {
        self.inner.read(|doc| doc.get(&user_id).cloned()).await
    }

    /// Remember `model` for `user_id`. Skips the write when unchanged.
    pub async fn set_model(&self, user_id: UserId, model: &str) -> Result<(), StoreError> {
        if self.model_for(user_id).await.as_deref() == Some(model) {
            return Ok(());
        }
        self.inner
            .update(|doc| {
                doc.insert(user_id, model.to_string());
            })
            .await
    }
}
