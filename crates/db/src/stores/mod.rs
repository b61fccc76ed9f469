//! File-backed stores.
//!
//! Each store is loaded once at startup and flushed on every write. Writes
//! go to a temporary sibling file that is synced and then renamed over the
//! target, so a crash never leaves a half-written document behind.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

pub mod admins;
pub mod canvas;
pub mod json;
pub mod preferences;

pub use admins::AdminStore;
pub use canvas::CanvasStore;
pub use json::JsonStore;
pub use preferences::PreferenceStore;

/// Errors from the file-backed stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write `bytes` to `path` through a synced temporary file and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().await.map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/doc.json");

        write_atomic(&target, b"{}").await.unwrap();
        write_atomic(&target, b"[1]").await.unwrap();

        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"[1]");
        assert!(!dir.path().join("nested/doc.json.tmp").exists());
    }
}
