use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outage_core::{Outage, OutageDraft};
use sqlx::PgPool;

use crate::models::outage::OutageRow;
use crate::store::OutageStore;

const OUTAGE_COLUMNS: &str = "id, autostart, warn_time, start_time, stop_time, title, description, \
                              access_key, created_by, modified_by, last_modified";

#[derive(Debug, Clone)]
pub struct OutageRepository {
    pool: PgPool,
}

impl OutageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutageStore for OutageRepository {
    async fn all(&self) -> Result<Vec<Outage>> {
        let rows = sqlx::query_as::<_, OutageRow>(&format!(
            "SELECT {} FROM outages ORDER BY start_time ASC, id ASC",
            OUTAGE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch outages")?;

        Ok(rows.into_iter().map(Outage::from).collect())
    }

    async fn unfinished(&self, now: DateTime<Utc>) -> Result<Vec<Outage>> {
        let rows = sqlx::query_as::<_, OutageRow>(&format!(
            "SELECT {} FROM outages WHERE stop_time > $1 ORDER BY start_time ASC, id ASC",
            OUTAGE_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch unfinished outages")?;

        Ok(rows.into_iter().map(Outage::from).collect())
    }

    async fn find(&self, id: i64) -> Result<Option<Outage>> {
        let row = sqlx::query_as::<_, OutageRow>(&format!(
            "SELECT {} FROM outages WHERE id = $1",
            OUTAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch outage")?;

        Ok(row.map(Outage::from))
    }

    async fn insert(&self, draft: &OutageDraft, author: Option<i64>) -> Result<Outage> {
        let row = sqlx::query_as::<_, OutageRow>(&format!(
            r#"
            INSERT INTO outages (autostart, warn_time, start_time, stop_time, title, description,
                                 access_key, created_by, modified_by, last_modified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, NOW())
            RETURNING {}
            "#,
            OUTAGE_COLUMNS
        ))
        .bind(draft.autostart)
        .bind(draft.warn_time)
        .bind(draft.start_time)
        .bind(draft.stop_time)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.access_key)
        .bind(author)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create outage")?;

        Ok(row.into())
    }

    async fn update(&self, id: i64, draft: &OutageDraft, author: Option<i64>) -> Result<Option<Outage>> {
        let row = sqlx::query_as::<_, OutageRow>(&format!(
            r#"
            UPDATE outages
            SET autostart = $2, warn_time = $3, start_time = $4, stop_time = $5, title = $6,
                description = $7, access_key = $8, modified_by = $9, last_modified = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            OUTAGE_COLUMNS
        ))
        .bind(id)
        .bind(draft.autostart)
        .bind(draft.warn_time)
        .bind(draft.start_time)
        .bind(draft.stop_time)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.access_key)
        .bind(author)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update outage")?;

        Ok(row.map(Outage::from))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM outages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete outage")?;

        Ok(result.rows_affected() > 0)
    }
}
