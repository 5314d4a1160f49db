use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use outage_core::{Outage, OutageDraft, OutageSettings};
use serde::Deserialize;
use tracing::info;

use super::ApiError;
use crate::auth::operator_id;
use crate::services::outage_service::OutageStatus;
use crate::AppState;

/// Submitted outage fields. Times are unix seconds; anything missing is
/// filled from the settings defaults (create) or the stored record (update).
#[derive(Debug, Default, Deserialize)]
pub struct OutageForm {
    pub autostart: Option<bool>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub warn_time: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub stop_time: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub access_key: Option<String>,
}

impl OutageForm {
    pub fn into_draft(self, settings: &OutageSettings, now: DateTime<Utc>) -> OutageDraft {
        let warning = Duration::seconds(settings.default_warning_duration);
        let start_time = self.start_time.unwrap_or(now + warning);
        OutageDraft {
            autostart: self.autostart.unwrap_or(settings.default_autostart),
            warn_time: self.warn_time.unwrap_or(start_time - warning),
            start_time,
            stop_time: self
                .stop_time
                .unwrap_or(start_time + Duration::seconds(settings.default_duration)),
            title: self.title.unwrap_or_else(|| settings.default_title.clone()),
            description: self
                .description
                .unwrap_or_else(|| settings.default_description.clone()),
            access_key: self.access_key,
        }
    }

    /// An empty `access_key` clears the stored one.
    pub fn merge_into(self, outage: &Outage) -> OutageDraft {
        let current = OutageDraft::from_outage(outage);
        OutageDraft {
            autostart: self.autostart.unwrap_or(current.autostart),
            warn_time: self.warn_time.unwrap_or(current.warn_time),
            start_time: self.start_time.unwrap_or(current.start_time),
            stop_time: self.stop_time.unwrap_or(current.stop_time),
            title: self.title.unwrap_or(current.title),
            description: self.description.unwrap_or(current.description),
            access_key: match self.access_key {
                Some(key) => Some(key),
                None => current.access_key,
            },
        }
    }
}

pub async fn list_outages(State(state): State<AppState>) -> Result<Json<Vec<Outage>>, ApiError> {
    Ok(Json(state.outages.list().await?))
}

pub async fn get_outage(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Outage>, ApiError> {
    state.outages.get(id).await?.map(Json).ok_or(ApiError::NotFound)
}

pub async fn get_status(State(state): State<AppState>) -> Result<Json<OutageStatus>, ApiError> {
    Ok(Json(state.outages.status(Utc::now()).await?))
}

pub async fn create_outage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<OutageForm>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let settings = state.settings.current().await;
    let draft = form.into_draft(&settings, now);
    let outage = state.outages.create(draft, operator_id(&headers), now).await?;
    Ok((StatusCode::CREATED, Json(outage)))
}

pub async fn update_outage(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(form): Json<OutageForm>,
) -> Result<Json<Outage>, ApiError> {
    let existing = state.outages.get(id).await?.ok_or(ApiError::NotFound)?;
    let draft = form.merge_into(&existing);
    state
        .outages
        .update(id, draft, operator_id(&headers), Utc::now())
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete_outage(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.outages.delete(id, Utc::now()).await? {
        info!("Outage #{} deleted through operator API", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

pub async fn finish_outage(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Outage>, ApiError> {
    state
        .outages
        .finish(id, operator_id(&headers), Utc::now())
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn start_outage(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Outage>, ApiError> {
    state
        .outages
        .start(id, operator_id(&headers), Utc::now())
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn api_request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer operator-token")
            .header("x-operator-id", "7");
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn missing_fields_take_settings_defaults() {
        let now = DateTime::from_timestamp(1_000_000, 0).unwrap();
        let settings = OutageSettings {
            default_warning_duration: 600,
            default_duration: 1800,
            default_autostart: true,
            ..OutageSettings::default()
        };

        let draft = OutageForm::default().into_draft(&settings, now);
        assert_eq!(draft.start_time, now + Duration::seconds(600));
        assert_eq!(draft.warn_time, now);
        assert_eq!(draft.stop_time, draft.start_time + Duration::seconds(1800));
        assert!(draft.autostart);
        assert_eq!(draft.title, settings.default_title);
        assert_eq!(draft.access_key, None);
    }

    #[tokio::test]
    async fn operator_api_requires_the_admin_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::build_router(test_state(dir.path()).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/api/outages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_finish_and_delete_through_the_api() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let gate_path = state.config.gate_path.clone();
        let app = crate::build_router(state);
        let now = Utc::now().timestamp();

        let response = app
            .clone()
            .oneshot(api_request(
                "POST",
                "/admin/api/outages",
                Some(serde_json::json!({
                    "autostart": true,
                    "start_time": now - 60,
                    "stop_time": now + 3600,
                    "title": "Database upgrade",
                    "access_key": "12345"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        let id = created["id"].as_i64().unwrap();
        assert_eq!(created["created_by"], 7);
        assert!(gate_path.exists());

        let response = app
            .clone()
            .oneshot(api_request("GET", "/admin/api/status", None))
            .await
            .unwrap();
        let status = json_body(response).await;
        assert_eq!(status["state"], "ongoing");
        assert_eq!(status["outage"]["id"], id);

        let response = app
            .clone()
            .oneshot(api_request("POST", &format!("/admin/api/outages/{}/finish", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!gate_path.exists());

        let response = app
            .clone()
            .oneshot(api_request("POST", &format!("/admin/api/outages/{}/finish", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(api_request("DELETE", &format!("/admin/api/outages/{}", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(api_request("GET", &format!("/admin/api/outages/{}", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_window_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::build_router(test_state(dir.path()).await);
        let now = Utc::now().timestamp();

        let response = app
            .oneshot(api_request(
                "POST",
                "/admin/api/outages",
                Some(serde_json::json!({
                    "start_time": now + 100,
                    "stop_time": now + 100
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_keeps_unsubmitted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let now = Utc::now();
        let outage = state
            .outages
            .create(
                crate::test_support::draft_around(now, 600, 1200, true, Some("k")),
                None,
                now,
            )
            .await
            .unwrap();
        let app = crate::build_router(state);

        let response = app
            .oneshot(api_request(
                "PUT",
                &format!("/admin/api/outages/{}", outage.id),
                Some(serde_json::json!({ "title": "Renamed" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated = json_body(response).await;
        assert_eq!(updated["title"], "Renamed");
        assert_eq!(updated["access_key"], "k");
        assert_eq!(updated["modified_by"], 7);
    }
}
