use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use outage_core::{evaluate, Outage, OutageDraft, OutageError, OutageState};
use outage_db::OutageStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::services::gate_compiler::{GateCompiler, GateUpdate};
use crate::settings::SettingsService;

#[derive(Debug, Clone, Serialize)]
pub struct OutageStatus {
    pub outage: Option<Outage>,
    pub state: OutageState,
}

/// Outage mutations. Every change re-evaluates and recompiles the gate.
pub struct OutageService {
    store: Arc<dyn OutageStore>,
    settings: Arc<SettingsService>,
    compiler: Arc<GateCompiler>,
    /// Serializes gate recompiles so a stale evaluation never lands last.
    gate_lock: Mutex<()>,
}

impl OutageService {
    pub fn new(
        store: Arc<dyn OutageStore>,
        settings: Arc<SettingsService>,
        compiler: Arc<GateCompiler>,
    ) -> Self {
        Self {
            store,
            settings,
            compiler,
            gate_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> Arc<dyn OutageStore> {
        self.store.clone()
    }

    pub async fn list(&self) -> Result<Vec<Outage>> {
        self.store.all().await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Outage>> {
        self.store.find(id).await
    }

    pub async fn status(&self, now: DateTime<Utc>) -> Result<OutageStatus> {
        let outages = self.store.unfinished(now).await?;
        let eval = evaluate(now, &outages);
        Ok(OutageStatus {
            outage: eval.outage.cloned(),
            state: eval.state,
        })
    }

    pub async fn create(&self, draft: OutageDraft, author: Option<i64>, now: DateTime<Utc>) -> Result<Outage> {
        let draft = draft.normalized();
        draft.validate()?;
        let outage = self.store.insert(&draft, author).await?;
        info!("Outage #{} created", outage.id);

        self.prepare_next_outage(now)
            .await
            .with_context(|| format!("Outage #{} saved but the gate could not be updated", outage.id))?;
        Ok(outage)
    }

    pub async fn update(
        &self,
        id: i64,
        draft: OutageDraft,
        author: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Option<Outage>> {
        let draft = draft.normalized();
        draft.validate()?;
        let Some(outage) = self.store.update(id, &draft, author).await? else {
            return Ok(None);
        };
        info!("Outage #{} updated", id);

        self.prepare_next_outage(now)
            .await
            .with_context(|| format!("Outage #{} saved but the gate could not be updated", id))?;
        Ok(Some(outage))
    }

    pub async fn delete(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        if !self.store.delete(id).await? {
            return Ok(false);
        }
        info!("Outage #{} deleted", id);

        self.prepare_next_outage(now)
            .await
            .with_context(|| format!("Outage #{} deleted but the gate could not be updated", id))?;
        Ok(true)
    }

    /// Ends an ongoing outage at `now`. An outage that started at this very
    /// instant is moved back a second to keep its window non-empty.
    pub async fn finish(&self, id: i64, author: Option<i64>, now: DateTime<Utc>) -> Result<Option<Outage>> {
        let Some(outage) = self.store.find(id).await? else {
            return Ok(None);
        };
        if !outage.is_ongoing(now) {
            return Err(OutageError::NotOngoing(id).into());
        }
        let mut draft = OutageDraft::from_outage(&outage);
        draft.stop_time = now;
        if draft.start_time >= draft.stop_time {
            draft.start_time = now - Duration::seconds(1);
            draft.warn_time = draft.warn_time.min(draft.start_time);
        }
        self.update(id, draft, author, now).await
    }

    /// Explicitly starts an outage that would not start on its own.
    pub async fn start(&self, id: i64, author: Option<i64>, now: DateTime<Utc>) -> Result<Option<Outage>> {
        let Some(outage) = self.store.find(id).await? else {
            return Ok(None);
        };
        if outage.has_ended(now) {
            return Err(OutageError::AlreadyEnded(id).into());
        }
        let mut draft = OutageDraft::from_outage(&outage);
        draft.autostart = true;
        if draft.start_time > now {
            draft.start_time = now;
        }
        if draft.warn_time > draft.start_time {
            draft.warn_time = draft.start_time;
        }
        self.update(id, draft, author, now).await
    }

    pub async fn update_settings(&self, values: HashMap<String, String>, now: DateTime<Utc>) -> Result<()> {
        self.settings.update(values).await?;
        info!("Outage settings updated");
        self.prepare_next_outage(now)
            .await
            .context("Settings saved but the gate could not be updated")?;
        Ok(())
    }

    /// Re-evaluates which outage is relevant and (re)compiles or removes the gate.
    pub async fn prepare_next_outage(&self, now: DateTime<Utc>) -> Result<GateUpdate> {
        let _guard = self.gate_lock.lock().await;
        let outages = self.store.unfinished(now).await?;
        let eval = evaluate(now, &outages);
        let settings = self.settings.current().await;
        self.compiler.update_gate(eval.outage, now, &settings).await
    }
}
