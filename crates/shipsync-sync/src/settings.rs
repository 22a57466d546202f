//! The authoritative load/save path for [`AutoSyncConfig`].
//!
//! Reads go through an in-process cache that is filled from the store on
//! first use and replaced on every successful update. `invalidate` drops it
//! so the next read reloads.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use shipsync_core::{AutoSyncConfig, AutoSyncConfigUpdate};
use shipsync_store::ConfigStore;

use crate::error::Result;

/// Cached access to the persisted auto-sync configuration.
pub struct AutoSyncSettings<S: ?Sized> {
    store: Arc<S>,
    cache: RwLock<Option<AutoSyncConfig>>,
}

impl<S: ConfigStore + ?Sized> AutoSyncSettings<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
        }
    }

    /// Current configuration; defaults if nothing was ever saved.
    pub async fn get(&self) -> Result<AutoSyncConfig> {
        if let Some(config) = self.cache.read().await.as_ref() {
            return Ok(config.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(config) = cache.as_ref() {
            return Ok(config.clone());
        }
        let config = self.store.load_auto_sync_config().await?.unwrap_or_default();
        *cache = Some(config.clone());
        Ok(config)
    }

    /// Validate, persist and cache a partial update.
    pub async fn update(&self, update: &AutoSyncConfigUpdate) -> Result<AutoSyncConfig> {
        let mut cache = self.cache.write().await;
        let current = match cache.as_ref() {
            Some(config) => config.clone(),
            None => self.store.load_auto_sync_config().await?.unwrap_or_default(),
        };

        let merged = current.merged(update);
        merged.validate()?;
        self.store.save_auto_sync_config(&merged).await?;

        info!(
            enabled = merged.enabled,
            trigger_statuses = merged.trigger_statuses.len(),
            retry_attempts = merged.retry_attempts,
            retry_delay_seconds = merged.retry_delay_seconds,
            "auto-sync configuration updated"
        );
        *cache = Some(merged.clone());
        Ok(merged)
    }

    /// Drop the cache and read the stored configuration again.
    pub async fn reload(&self) -> Result<AutoSyncConfig> {
        self.invalidate().await;
        self.get().await
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipsync_store::MemoryStore;

    #[tokio::test]
    async fn test_defaults_until_saved() {
        let store = Arc::new(MemoryStore::new());
        let settings = AutoSyncSettings::new(Arc::clone(&store));

        assert_eq!(settings.get().await.unwrap(), AutoSyncConfig::default());
        assert!(store.load_auto_sync_config().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_update_persists() {
        let store = Arc::new(MemoryStore::new());
        let settings = AutoSyncSettings::new(Arc::clone(&store));

        let updated = settings
            .update(&AutoSyncConfigUpdate {
                enabled: Some(true),
                retry_attempts: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(updated.enabled);
        assert_eq!(updated.retry_delay_seconds, 30);

        let fresh = AutoSyncSettings::new(Arc::clone(&store));
        assert_eq!(fresh.get().await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let settings = AutoSyncSettings::new(Arc::clone(&store));

        let result = settings
            .update(&AutoSyncConfigUpdate {
                retry_attempts: Some(11),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());
        assert_eq!(settings.get().await.unwrap().retry_attempts, 3);
    }

    #[tokio::test]
    async fn test_cache_is_explicitly_invalidated() {
        let store = Arc::new(MemoryStore::new());
        let settings = AutoSyncSettings::new(Arc::clone(&store));
        settings.get().await.unwrap();

        let mut external = AutoSyncConfig::default();
        external.enabled = true;
        store.save_auto_sync_config(&external).await.unwrap();

        assert!(!settings.get().await.unwrap().enabled);
        assert!(settings.reload().await.unwrap().enabled);
    }
}
