use chrono::{DateTime, Utc};
use outage_core::Outage;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutageRow {
    pub id: i64,
    pub autostart: bool,
    pub warn_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub access_key: Option<String>,
    pub created_by: Option<i64>,
    pub modified_by: Option<i64>,
    pub last_modified: DateTime<Utc>,
}

impl From<OutageRow> for Outage {
    fn from(row: OutageRow) -> Self {
        Outage {
            id: row.id,
            autostart: row.autostart,
            warn_time: row.warn_time,
            start_time: row.start_time,
            stop_time: row.stop_time,
            title: row.title,
            description: row.description,
            access_key: row.access_key,
            created_by: row.created_by,
            modified_by: row.modified_by,
            last_modified: row.last_modified,
        }
    }
}
