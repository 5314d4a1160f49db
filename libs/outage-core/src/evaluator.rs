use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::outage::Outage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutageState {
    None,
    Warning,
    Ongoing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation<'a> {
    /// The outage currently warning/ongoing, else the soonest upcoming one.
    pub outage: Option<&'a Outage>,
    pub state: OutageState,
}

/// Picks the single outage relevant at `now` and classifies it.
///
/// Outages with `warn_time <= now < stop_time` win over upcoming ones; among
/// several, the earliest `start_time` wins, then the lowest id.
pub fn evaluate(now: DateTime<Utc>, outages: &[Outage]) -> Evaluation<'_> {
    let current = outages
        .iter()
        .filter(|o| o.warn_time <= now && now < o.stop_time)
        .min_by_key(|o| (o.start_time, o.id));

    if let Some(outage) = current {
        return Evaluation {
            outage: Some(outage),
            state: outage.state_at(now),
        };
    }

    let upcoming = outages
        .iter()
        .filter(|o| o.start_time > now)
        .min_by_key(|o| (o.start_time, o.id));

    Evaluation {
        outage: upcoming,
        state: OutageState::None,
    }
}
