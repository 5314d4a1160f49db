use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::store::SettingsStore;

#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for SettingsRepository {
    async fn load(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM outage_settings")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch outage settings")?;

        Ok(rows.into_iter().collect())
    }

    async fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (key, value) in values {
            sqlx::query(
                "INSERT INTO outage_settings (key, value) VALUES ($1, $2)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .context(format!("Failed to update setting {}", key))?;
        }

        tx.commit().await?;
        Ok(())
    }
}
