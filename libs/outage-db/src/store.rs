use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outage_core::{Outage, OutageDraft};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence of outage records.
#[async_trait]
pub trait OutageStore: Send + Sync {
    async fn all(&self) -> Result<Vec<Outage>>;

    /// Outages whose `stop_time` is still ahead of `now`.
    async fn unfinished(&self, now: DateTime<Utc>) -> Result<Vec<Outage>>;

    async fn find(&self, id: i64) -> Result<Option<Outage>>;

    async fn insert(&self, draft: &OutageDraft, author: Option<i64>) -> Result<Outage>;

    async fn update(&self, id: i64, draft: &OutageDraft, author: Option<i64>) -> Result<Option<Outage>>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// Key/value storage for site-wide outage settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, String>>;

    async fn save(&self, values: &HashMap<String, String>) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryOutages {
    next_id: i64,
    rows: Vec<Outage>,
}

/// In-process store, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryOutageStore {
    inner: RwLock<MemoryOutages>,
}

impl MemoryOutageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_draft(outage: &mut Outage, draft: &OutageDraft, author: Option<i64>) {
    outage.autostart = draft.autostart;
    outage.warn_time = draft.warn_time;
    outage.start_time = draft.start_time;
    outage.stop_time = draft.stop_time;
    outage.title = draft.title.clone();
    outage.description = draft.description.clone();
    outage.access_key = draft.access_key.clone();
    outage.modified_by = author;
    outage.last_modified = Utc::now();
}

#[async_trait]
impl OutageStore for MemoryOutageStore {
    async fn all(&self) -> Result<Vec<Outage>> {
        let mut rows = self.inner.read().await.rows.clone();
        rows.sort_by_key(|o| (o.start_time, o.id));
        Ok(rows)
    }

    async fn unfinished(&self, now: DateTime<Utc>) -> Result<Vec<Outage>> {
        let mut rows = self.all().await?;
        rows.retain(|o| o.stop_time > now);
        Ok(rows)
    }

    async fn find(&self, id: i64) -> Result<Option<Outage>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.iter().find(|o| o.id == id).cloned())
    }

    async fn insert(&self, draft: &OutageDraft, author: Option<i64>) -> Result<Outage> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let mut outage = Outage {
            id: inner.next_id,
            autostart: draft.autostart,
            warn_time: draft.warn_time,
            start_time: draft.start_time,
            stop_time: draft.stop_time,
            title: String::new(),
            description: String::new(),
            access_key: None,
            created_by: author,
            modified_by: author,
            last_modified: Utc::now(),
        };
        apply_draft(&mut outage, draft, author);
        inner.rows.push(outage.clone());
        Ok(outage)
    }

    async fn update(&self, id: i64, draft: &OutageDraft, author: Option<i64>) -> Result<Option<Outage>> {
        let mut inner = self.inner.write().await;
        let Some(outage) = inner.rows.iter_mut().find(|o| o.id == id) else {
            return Ok(None);
        };
        apply_draft(outage, draft, author);
        Ok(Some(outage.clone()))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.rows.len();
        inner.rows.retain(|o| o.id != id);
        Ok(inner.rows.len() != before)
    }
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<HashMap<String, String>> {
        Ok(self.values.read().await.clone())
    }

    async fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        let mut stored = self.values.write().await;
        for (key, value) in values {
            stored.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}
