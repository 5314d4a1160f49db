use anyhow::{bail, Context, Result};
use outage_core::settings::{ALLOWED_IPS_FORCED, EDITABLE_KEYS};
use outage_core::OutageSettings;
use outage_db::SettingsStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Cached outage settings; the forced allow-list comes from the panel config only.
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    forced_ips: String,
    cache: RwLock<HashMap<String, String>>,
}

impl SettingsService {
    pub async fn new(store: Arc<dyn SettingsStore>, forced_ips: String) -> Result<Self> {
        let service = Self {
            store,
            forced_ips,
            cache: RwLock::new(HashMap::new()),
        };

        service.reload_cache().await?;
        Ok(service)
    }

    pub async fn reload_cache(&self) -> Result<()> {
        let values = self
            .store
            .load()
            .await
            .context("Failed to load outage settings")?;

        let mut cache = self.cache.write().await;
        *cache = values;
        info!("Settings cache reloaded with {} items", cache.len());
        Ok(())
    }

    pub async fn current(&self) -> OutageSettings {
        let mut values = self.cache.read().await.clone();
        values.insert(ALLOWED_IPS_FORCED.to_string(), self.forced_ips.clone());
        OutageSettings::from_values(&values)
    }

    /// Stores operator-editable keys. Unknown keys are rejected as a whole.
    pub async fn update(&self, values: HashMap<String, String>) -> Result<()> {
        if let Some(key) = values.keys().find(|k| !EDITABLE_KEYS.contains(&k.as_str())) {
            bail!("Unknown or read-only setting: {}", key);
        }

        self.store.save(&values).await?;

        let mut cache = self.cache.write().await;
        cache.extend(values);
        Ok(())
    }
}
