//! Generic load-on-start, flush-on-write JSON document.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use super::{write_atomic, StoreError};

/// A JSON document held in memory behind a [`RwLock`].
///
/// Mutations are applied to a copy, persisted, and only then swapped in,
/// so a failed write leaves both the file and the in-memory value as they
/// were.
pub struct JsonStore<T> {
    path: PathBuf,
    value: RwLock<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    /// Load `path`, starting from `T::default()` when the file is absent.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let value = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => T::default(),
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::json(&path, e))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Store file missing, starting empty");
                T::default()
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        Ok(Self {
            path,
            value: RwLock::new(value),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the current value.
    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.value.read().await;
        f(&guard)
    }

    /// Apply `f` and persist the result. Writers are serialized.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        let mut guard = self.value.write().await;
        let mut next = guard.clone();
        let result = f(&mut next);
        let bytes = serde_json::to_vec_pretty(&next).map_err(|e| StoreError::json(&self.path, e))?;
        write_atomic(&self.path, &bytes).await?;
        *guard = next;
        Ok(result)
    }
}
