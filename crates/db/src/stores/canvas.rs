//! On-disk canvas store, one directory per guild.
//!
//! ```text
//! <root>/<guild_id>/canvas.json          metadata + current image file name
//! <root>/<guild_id>/canvas-<rev>-<id>.png
//! ```
//!
//! A commit writes the new image under a fresh name, then renames the new
//! `canvas.json` into place. That rename is the commit point; older image
//! files are removed afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use comfybot_core::canvas::{CanvasMetadata, CanvasSnapshot};
use comfybot_core::types::GuildId;

use super::{write_atomic, StoreError};

const METADATA_FILE: &str = "canvas.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredCanvas {
    image_file: String,
    metadata: CanvasMetadata,
}

pub struct CanvasStore {
    root: PathBuf,
}

impl CanvasStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn guild_dir(&self, guild_id: GuildId) -> PathBuf {
        self.root.join(guild_id.to_string())
    }

    /// Current canvas for `guild_id`, if one was started.
    pub async fn load(&self, guild_id: GuildId) -> Result<Option<CanvasSnapshot>, StoreError> {
        let dir = self.guild_dir(guild_id);
        let meta_path = dir.join(METADATA_FILE);
        let bytes = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&meta_path, e)),
        };
        let stored: StoredCanvas =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::json(&meta_path, e))?;

        let image_path = dir.join(&stored.image_file);
        let image = tokio::fs::read(&image_path)
            .await
            .map_err(|e| StoreError::io(&image_path, e))?;

        Ok(Some(CanvasSnapshot {
            metadata: stored.metadata,
            image,
        }))
    }

    /// Persist `snapshot` as the guild's current canvas.
    pub async fn commit(&self, snapshot: &CanvasSnapshot) -> Result<(), StoreError> {
        let guild_id = snapshot.metadata.guild_id;
        let dir = self.guild_dir(guild_id);
        let image_file = format!(
            "canvas-{}-{}.png",
            snapshot.metadata.revision,
            uuid::Uuid::new_v4().simple()
        );

        write_atomic(&dir.join(&image_file), &snapshot.image).await?;

        let stored = StoredCanvas {
            image_file: image_file.clone(),
            metadata: snapshot.metadata.clone(),
        };
        let meta_path = dir.join(METADATA_FILE);
        let bytes =
            serde_json::to_vec_pretty(&stored).map_err(|e| StoreError::json(&meta_path, e))?;
        write_atomic(&meta_path, &bytes).await?;

        tracing::debug!(guild_id, revision = snapshot.metadata.revision, %image_file, "Canvas committed");
        remove_stale_images(&dir, &image_file).await;
        Ok(())
    }
}

/// Best-effort cleanup of superseded canvas images.
async fn remove_stale_images(dir: &Path, keep: &str) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("canvas-") && name.ends_with(".png") && name != keep {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                tracing::warn!(file = %name, error = %e, "Failed to remove stale canvas image");
            }
        }
    }
}
