use axum::{extract::State, Json};
use chrono::Utc;
use outage_core::settings::EDITABLE_KEYS;
use outage_core::OutageSettings;
use std::collections::HashMap;

use super::ApiError;
use crate::AppState;

pub async fn get_settings(State(state): State<AppState>) -> Json<OutageSettings> {
    Json(state.settings.current().await)
}

/// Saves the submitted keys and recompiles the gate.
pub async fn save_settings(
    State(state): State<AppState>,
    Json(values): Json<HashMap<String, String>>,
) -> Result<Json<OutageSettings>, ApiError> {
    if let Some(key) = values.keys().find(|k| !EDITABLE_KEYS.contains(&k.as_str())) {
        return Err(ApiError::BadRequest(format!(
            "Unknown or read-only setting: {}",
            key
        )));
    }

    state.outages.update_settings(values, Utc::now()).await?;
    Ok(Json(state.settings.current().await))
}
