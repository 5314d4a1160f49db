use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluator::OutageState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutageError {
    #[error("start time must be before stop time")]
    InvalidWindow,
    #[error("warning time must not be after start time")]
    WarningAfterStart,
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("outage #{0} is not ongoing")]
    NotOngoing(i64),
    #[error("outage #{0} has already ended")]
    AlreadyEnded(i64),
}

/// A scheduled maintenance window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outage {
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

impl Outage {
    /// Inside `[start_time, stop_time)` and allowed to start on its own.
    pub fn is_ongoing(&self, now: DateTime<Utc>) -> bool {
        self.autostart && self.start_time <= now && now < self.stop_time
    }

    pub fn is_warning(&self, now: DateTime<Utc>) -> bool {
        self.warn_time <= now && now < self.start_time
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.stop_time <= now
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> OutageState {
        if self.is_ongoing(now) {
            OutageState::Ongoing
        } else if self.is_warning(now) {
            OutageState::Warning
        } else {
            OutageState::None
        }
    }

    pub fn duration(&self) -> Duration {
        self.stop_time - self.start_time
    }

    /// Expands `{{start}}`, `{{stop}}` and `{{duration}}` in display text.
    pub fn render_text(&self, text: &str) -> String {
        text.replace("{{start}}", &format_instant(self.start_time))
            .replace("{{stop}}", &format_instant(self.stop_time))
            .replace("{{duration}}", &format_duration(self.duration()))
    }

    pub fn display_title(&self) -> String {
        self.render_text(&self.title)
    }

    pub fn display_description(&self) -> String {
        self.render_text(&self.description)
    }
}

/// Editable fields of an outage, as submitted through the operator API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutageDraft {
    pub autostart: bool,
    pub warn_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub access_key: Option<String>,
}

impl OutageDraft {
    pub fn validate(&self) -> Result<(), OutageError> {
        if self.start_time >= self.stop_time {
            return Err(OutageError::InvalidWindow);
        }
        if self.warn_time > self.start_time {
            return Err(OutageError::WarningAfterStart);
        }
        if self.title.trim().is_empty() {
            return Err(OutageError::EmptyTitle);
        }
        Ok(())
    }

    /// Blank access keys mean "no key policy".
    pub fn normalized(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.access_key = self
            .access_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self
    }

    pub fn from_outage(outage: &Outage) -> Self {
        Self {
            autostart: outage.autostart,
            warn_time: outage.warn_time,
            start_time: outage.start_time,
            stop_time: outage.stop_time,
            title: outage.title.clone(),
            description: outage.description.clone(),
            access_key: outage.access_key.clone(),
        }
    }
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes();
    let (hours, minutes) = (minutes / 60, minutes % 60);
    match (hours, minutes) {
        (0, m) => format!("{} min", m),
        (h, 0) => format!("{} h", h),
        (h, m) => format!("{} h {} min", h, m),
    }
}
