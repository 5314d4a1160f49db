use crate::gate::GateStatus;
use crate::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let gate = match state.gate.current().await {
        GateStatus::Absent => "absent",
        GateStatus::Loaded(_) => "installed",
        GateStatus::Invalid => "invalid",
    };

    Json(json!({
        "status": "ok",
        "gate": gate,
        "version": env!("CARGO_PKG_VERSION")
    }))
}
