//! System settings: one record in the tree store, mirrored locally.
//!
//! Readers subscribe with [`SettingsSync::watch`]; every successful
//! [`refresh`](SettingsSync::refresh) or [`save`](SettingsSync::save) that
//! changes the settings notifies them.

use nst_core::{NstResult, SystemSettings, SETTINGS_LOCAL_KEY, SETTINGS_PATH};
use tokio::sync::watch;

use crate::context::StoreContext;

pub struct SettingsSync {
    ctx: StoreContext,
    current: watch::Sender<SystemSettings>,
}

impl SettingsSync {
    /// Start from the local mirror, or defaults when there is none.
    pub fn new(ctx: StoreContext) -> Self {
        let initial = read_local(&ctx).unwrap_or_default();
        let (current, _) = watch::channel(initial);
        Self { ctx, current }
    }

    pub fn watch(&self) -> watch::Receiver<SystemSettings> {
        self.current.subscribe()
    }

    pub fn current(&self) -> SystemSettings {
        self.current.borrow().clone()
    }

    pub async fn save(&self, settings: &SystemSettings) -> NstResult<()> {
        let value = serde_json::to_value(settings)?;
        self.ctx
            .remote("set", self.ctx.tree().set(SETTINGS_PATH, value.clone()))
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "settings save failed"))?;
        self.ctx.mirror_local(SETTINGS_LOCAL_KEY, &value);
        self.publish(settings.clone());
        Ok(())
    }

    /// Fetch the settings record.
    ///
    /// Falls back to the local mirror when the store is unreachable, and to
    /// defaults when the record does not exist.
    pub async fn load(&self) -> NstResult<SystemSettings> {
        match self
            .ctx
            .remote("get", self.ctx.tree().get(SETTINGS_PATH))
            .await
        {
            Ok(Some(value)) => {
                let settings: SystemSettings = serde_json::from_value(value.clone())?;
                self.ctx.mirror_local(SETTINGS_LOCAL_KEY, &value);
                Ok(settings)
            }
            Ok(None) => Ok(SystemSettings::default()),
            Err(e) => match read_local(&self.ctx) {
                Some(settings) => {
                    tracing::warn!(error = %e, "settings store unreachable, using local copy");
                    Ok(settings)
                }
                None => Err(e),
            },
        }
    }

    /// Load and notify watchers when the settings changed.
    pub async fn refresh(&self) -> NstResult<SystemSettings> {
        let settings = self.load().await?;
        self.publish(settings.clone());
        Ok(settings)
    }

    fn publish(&self, settings: SystemSettings) {
        self.current.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        });
    }
}

fn read_local(ctx: &StoreContext) -> Option<SystemSettings> {
    match ctx.local().get(SETTINGS_LOCAL_KEY) {
        Ok(Some(entry)) => serde_json::from_value(entry.value).ok(),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "local settings read failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nst_core::NstConfig;
    use nst_storage::TreeStore;
    use nst_test_utils::MemoryStores;
    use serde_json::json;

    fn sync(stores: &MemoryStores) -> SettingsSync {
        SettingsSync::new(StoreContext::new(
            stores.documents.clone(),
            stores.tree.clone(),
            stores.local.clone(),
            NstConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let stores = MemoryStores::new();
        let sync = sync(&stores);
        let settings = SystemSettings {
            maintenance_mode: true,
            daily_reward: 3,
            ..SystemSettings::default()
        };

        sync.save(&settings).await.unwrap();
        assert_eq!(sync.load().await.unwrap(), settings);
        assert_eq!(sync.current(), settings);
    }

    #[tokio::test]
    async fn test_missing_record_is_default() {
        let stores = MemoryStores::new();
        assert_eq!(sync(&stores).load().await.unwrap(), SystemSettings::default());
    }

    #[tokio::test]
    async fn test_offline_load_uses_local_mirror() {
        let stores = MemoryStores::new();
        stores
            .tree
            .set(SETTINGS_PATH, json!({"appName": "NST Pro", "signupBonus": 20}))
            .await
            .unwrap();
        let sync = sync(&stores);
        sync.load().await.unwrap();

        stores.tree.set_connected(false);
        let offline = sync.load().await.unwrap();
        assert_eq!(offline.app_name, "NST Pro");
        assert_eq!(offline.signup_bonus, 20);

        // A fresh instance starts from the mirror too.
        assert_eq!(self::sync(&stores).current().app_name, "NST Pro");
    }

    #[tokio::test]
    async fn test_offline_without_mirror_errors() {
        let stores = MemoryStores::new();
        stores.tree.set_connected(false);
        assert!(sync(&stores).load().await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_notifies_on_change_only() {
        let stores = MemoryStores::new();
        let sync = sync(&stores);
        let mut rx = sync.watch();

        sync.refresh().await.unwrap();
        assert!(!rx.has_changed().unwrap());

        stores
            .tree
            .set(SETTINGS_PATH, json!({"maintenanceMode": true}))
            .await
            .unwrap();
        sync.refresh().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().maintenance_mode);
    }
}
