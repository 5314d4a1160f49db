use chrono::{DateTime, Duration, Utc};
use outage_core::policy::{IpPolicy, KeyPolicy, GATE_FORMAT_VERSION};
use outage_core::{GatePolicy, OutageDraft};
use outage_db::{MemoryOutageStore, MemorySettingsStore};
use std::path::Path;
use std::sync::Arc;

use crate::config::PanelConfig;
use crate::AppState;

pub fn test_config(dir: &Path) -> PanelConfig {
    PanelConfig {
        admin_token: "operator-token".to_string(),
        gate_path: dir.join("maintenance.json"),
        fallback_page_path: dir.join("maintenance.html"),
        ..PanelConfig::default()
    }
}

/// Draft whose window is offset from `now`; the warning starts a minute before.
pub fn draft_around(
    now: DateTime<Utc>,
    start_offset_secs: i64,
    stop_offset_secs: i64,
    autostart: bool,
    access_key: Option<&str>,
) -> OutageDraft {
    let start_time = now + Duration::seconds(start_offset_secs);
    OutageDraft {
        autostart,
        warn_time: start_time - Duration::seconds(60),
        start_time,
        stop_time: now + Duration::seconds(stop_offset_secs),
        title: "Upgrade".to_string(),
        description: "Back at {{stop}}".to_string(),
        access_key: access_key.map(str::to_string),
    }
}

/// Policy for a one hour window opening a minute before `now + start_offset_secs`.
pub fn policy_around(
    now: DateTime<Utc>,
    allowed: &[&str],
    access_key: Option<&str>,
    start_offset_secs: i64,
) -> GatePolicy {
    let starts_at = now + Duration::seconds(start_offset_secs - 60);
    GatePolicy {
        version: GATE_FORMAT_VERSION,
        outage_id: 1,
        starts_at,
        stops_at: starts_at + Duration::seconds(3660),
        ip_policy: (!allowed.is_empty()).then(|| IpPolicy {
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }),
        key_policy: access_key.map(|k| KeyPolicy {
            access_key: k.to_string(),
        }),
    }
}

pub fn install_gate(config: &PanelConfig, allowed: &[&str], access_key: Option<&str>, start_offset_secs: i64) {
    let policy = policy_around(Utc::now(), allowed, access_key, start_offset_secs);
    std::fs::write(&config.gate_path, policy.to_artifact().unwrap()).unwrap();
}

pub async fn test_state(dir: &Path) -> AppState {
    test_state_with(test_config(dir)).await
}

pub async fn test_state_with(config: PanelConfig) -> AppState {
    AppState::build(
        config,
        Arc::new(MemoryOutageStore::new()),
        Arc::new(MemorySettingsStore::new()),
        reqwest::Client::new(),
    )
    .await
    .unwrap()
}
