//! Per-guild admin sets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use comfybot_core::types::{GuildId, UserId};

use super::{JsonStore, StoreError};

/// `{ "<guild_id>": [user_id, ...] }`
pub struct AdminStore {
    inner: JsonStore<BTreeMap<GuildId, BTreeSet<UserId>>>,
}

impl AdminStore {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self {
            inner: JsonStore::load(path).await?,
        })
    }

    pub async fn admins(&self, guild_id: GuildId) -> BTreeSet<UserId> {
        self.inner
            .read(|doc| doc.get(&guild_id).cloned().unwrap_or_default())
            .await
    }

    /// Returns `false` when the user already was an admin.
    pub async fn add(&self, guild_id: GuildId, user_id: UserId) -> Result<bool, StoreError> {
        self.inner
            .update(|doc| doc.entry(guild_id).or_default().insert(user_id))
            .await
    }

    /// Returns `false` when the user was not an admin.
    pub async fn remove(&self, guild_id: GuildId, user_id: UserId) -> Result<bool, StoreError> {
        self.inner
            .update(|doc| {
                let Some(set) = doc.get_mut(&guild_id) else {
                    return false;
                };
                let removed = set.remove(&user_id);
                if set.is_empty() {
                    doc.remove(&guild_id);
                }
                removed
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_remove_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admins.json");
        let store = AdminStore::load(&path).await.unwrap();

        assert!(store.add(1, 10).await.unwrap());
        assert!(!store.add(1, 10).await.unwrap());
        assert!(store.add(2, 20).await.unwrap());

        let reloaded = AdminStore::load(&path).await.unwrap();
        assert_eq!(reloaded.admins(1).await, BTreeSet::from([10]));
        assert!(reloaded.admins(3).await.is_empty());

        assert!(reloaded.remove(1, 10).await.unwrap());
        assert!(!reloaded.remove(1, 10).await.unwrap());
        assert!(reloaded.admins(1).await.is_empty());
    }
}
