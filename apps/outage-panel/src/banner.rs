use anyhow::Result;
use askama::Template;
use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Duration, Utc};
use outage_core::{evaluate, Outage, OutageState};
use outage_db::OutageStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::is_operator;
use crate::settings::SettingsService;
use crate::utils::insert_after_body_open;
use crate::AppState;

pub const PREVIEW_PARAM: &str = "outage_preview";
pub const DELTA_PARAM: &str = "outage_delta";
const MAX_HTML_BODY: usize = 16 * 1024 * 1024;

#[derive(Template)]
#[template(path = "banner.html")]
struct BannerTemplate<'a> {
    css: &'a str,
    state: &'a str,
    countdown_to: i64,
    preview: bool,
    title: &'a str,
    remaining: &'a str,
}

#[derive(Template)]
#[template(path = "banner_content.html")]
struct BannerContentTemplate<'a> {
    state: &'a str,
    countdown_to: i64,
    preview: bool,
    title: &'a str,
    remaining: &'a str,
}

/// Per-response state handed through the banner call chain.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext {
    pub path: String,
    pub query: HashMap<String, String>,
    pub is_operator: bool,
    /// Set once the full banner (styles and script included) was produced.
    pub banner_emitted: bool,
}

impl ResponseContext {
    pub fn new(path: impl Into<String>, query: HashMap<String, String>, is_operator: bool) -> Self {
        Self {
            path: path.into(),
            query,
            is_operator,
            banner_emitted: false,
        }
    }
}

pub struct BannerInjector {
    store: Arc<dyn OutageStore>,
    settings: Arc<SettingsService>,
    admin_path: String,
}

impl BannerInjector {
    pub fn new(store: Arc<dyn OutageStore>, settings: Arc<SettingsService>, admin_path: &str) -> Self {
        Self {
            store,
            settings,
            admin_path: admin_path.to_string(),
        }
    }

    /// Banner markup for this response, or `None`. Never fails.
    pub async fn inject(&self, ctx: &mut ResponseContext, now: DateTime<Utc>) -> Option<String> {
        match self.render(ctx, now).await {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!("Outage banner skipped for {}: {:#}", ctx.path, e);
                None
            }
        }
    }

    fn is_suppressed(&self, ctx: &ResponseContext) -> bool {
        ctx.path == format!("{}/settings", self.admin_path)
            && ctx.query.get("section").map(String::as_str) == Some("additionalhtml")
    }

    async fn render(&self, ctx: &mut ResponseContext, now: DateTime<Utc>) -> Result<Option<String>> {
        if self.is_suppressed(ctx) {
            return Ok(None);
        }

        let preview = ctx.query.contains_key(PREVIEW_PARAM);
        let (outage, state, at) = if preview {
            match self.preview_target(ctx, now).await? {
                Some(found) => found,
                None => return Ok(None),
            }
        } else {
            let outages = self.store.unfinished(now).await?;
            let eval = evaluate(now, &outages);
            match eval.outage {
                Some(outage) => (outage.clone(), eval.state, now),
                None => return Ok(None),
            }
        };

        let countdown_target = match state {
            OutageState::None => return Ok(None),
            OutageState::Warning => outage.start_time,
            OutageState::Ongoing => outage.stop_time,
        };
        let remaining_time = countdown_target - at;
        let remaining = format_remaining(remaining_time);
        let countdown_to = (now + remaining_time).timestamp();
        let title = outage.display_title();
        let state_name = match state {
            OutageState::Warning => "warning",
            _ => "ongoing",
        };

        let fragment = if ctx.banner_emitted {
            BannerContentTemplate {
                state: state_name,
                countdown_to,
                preview,
                title: &title,
                remaining: &remaining,
            }
            .render()?
        } else {
            let settings = self.settings.current().await;
            let full = BannerTemplate {
                css: &settings.css,
                state: state_name,
                countdown_to,
                preview,
                title: &title,
                remaining: &remaining,
            }
            .render()?;
            ctx.banner_emitted = true;
            full
        };
        Ok(Some(fragment))
    }

    /// Outage and simulated instant for an operator preview; `None` when not allowed or unknown.
    async fn preview_target(
        &self,
        ctx: &ResponseContext,
        now: DateTime<Utc>,
    ) -> Result<Option<(Outage, OutageState, DateTime<Utc>)>> {
        if !ctx.is_operator {
            debug!("Ignoring banner preview from non-operator");
            return Ok(None);
        }
        let Some(id) = ctx.query.get(PREVIEW_PARAM).and_then(|v| v.trim().parse::<i64>().ok()) else {
            return Ok(None);
        };
        let delta = match ctx.query.get(DELTA_PARAM) {
            None => 0,
            Some(v) => match v.trim().parse::<i64>() {
                Ok(delta) => delta,
                Err(_) => return Ok(None),
            },
        };
        let Some(at) = Duration::try_seconds(delta).and_then(|d| now.checked_add_signed(d)) else {
            return Ok(None);
        };

        let Some(outage) = self.store.find(id).await? else {
            return Ok(None);
        };
        let state = evaluate(at, std::slice::from_ref(&outage)).state;
        Ok(Some((outage, state, at)))
    }
}

fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else {
        format!("{}m {}s", m, s)
    }
}

/// Compressed bodies and bodies that may exceed the buffer limit are passed
/// through without a banner.
fn is_rewritable(response: &Response) -> bool {
    let encoded = response
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("identity"));
    if encoded {
        debug!("Skipping banner for encoded response");
        return false;
    }
    match response.body().size_hint().upper() {
        Some(upper) if upper <= MAX_HTML_BODY as u64 => true,
        _ => {
            debug!("Skipping banner for response without a bounded size");
            false
        }
    }
}

/// Adds the outage banner to HTML responses.
pub async fn banner_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let query: HashMap<String, String> = req
        .uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();
    let mut ctx = ResponseContext::new(
        req.uri().path(),
        query,
        is_operator(&state.config, req.headers(), &jar),
    );

    let response = next.run(req).await;
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));
    if !is_html || !is_rewritable(&response) {
        return response;
    }

    let Some(fragment) = state.banner.inject(&mut ctx, Utc::now()).await else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_HTML_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to buffer response for banner: {}", e);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };
    let html = match String::from_utf8(bytes.to_vec()) {
        Ok(html) => html,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };

    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(insert_after_body_open(&html, &fragment)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::draft_around;
    use anyhow::bail;
    use async_trait::async_trait;
    use outage_core::OutageDraft;
    use outage_db::{MemoryOutageStore, MemorySettingsStore};

    struct BrokenStore;

    #[async_trait]
    impl OutageStore for BrokenStore {
        async fn all(&self) -> Result<Vec<Outage>> {
            bail!("database is down")
        }
        async fn unfinished(&self, _now: DateTime<Utc>) -> Result<Vec<Outage>> {
            bail!("database is down")
        }
        async fn find(&self, _id: i64) -> Result<Option<Outage>> {
            bail!("database is down")
        }
        async fn insert(&self, _draft: &OutageDraft, _author: Option<i64>) -> Result<Outage> {
            bail!("database is down")
        }
        async fn update(&self, _id: i64, _draft: &OutageDraft, _author: Option<i64>) -> Result<Option<Outage>> {
            bail!("database is down")
        }
        async fn delete(&self, _id: i64) -> Result<bool> {
            bail!("database is down")
        }
    }

    async fn injector(store: Arc<dyn OutageStore>) -> BannerInjector {
        let settings = SettingsService::new(Arc::new(MemorySettingsStore::new()), String::new())
            .await
            .unwrap();
        BannerInjector::new(store, Arc::new(settings), "/admin")
    }

    async fn store_with(drafts: Vec<OutageDraft>) -> (Arc<MemoryOutageStore>, Vec<i64>) {
        let store = Arc::new(MemoryOutageStore::new());
        let mut ids = Vec::new();
        for draft in drafts {
            ids.push(store.insert(&draft, None).await.unwrap().id);
        }
        (store, ids)
    }

    fn ctx(path: &str, query: &[(&str, &str)], is_operator: bool) -> ResponseContext {
        let query = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ResponseContext::new(path, query, is_operator)
    }

    #[tokio::test]
    async fn second_banner_in_a_response_omits_styles_and_script() {
        let now = Utc::now();
        let (store, _) = store_with(vec![draft_around(now, -100, 200, true, None)]).await;
        let injector = injector(store).await;
        let mut ctx = ctx("/course", &[], false);

        let first = injector.inject(&mut ctx, now).await.unwrap();
        assert!(ctx.banner_emitted);
        let second = injector.inject(&mut ctx, now).await.unwrap();

        assert!(first.contains("<style>"));
        assert!(first.contains("<script>"));
        assert!(first.contains("outage-ongoing"));
        assert!(second.contains("id=\"outage-banner\""));
        assert!(!second.contains("<style>"));
        assert!(!second.contains("<script>"));
        assert!(second.len() < first.len());

        let mut fresh = ResponseContext::new("/course", HashMap::new(), false);
        assert_eq!(injector.inject(&mut fresh, now).await.unwrap(), first);
    }

    #[tokio::test]
    async fn warns_before_start_and_stays_quiet_without_outages() {
        let now = Utc::now();
        let (store, _) = store_with(vec![draft_around(now, 30, 200, true, None)]).await;
        let fragment = injector(store).await.inject(&mut ctx("/", &[], false), now).await.unwrap();
        assert!(fragment.contains("outage-warning"));
        assert!(fragment.contains("Starts in"));

        let (empty, _) = store_with(vec![]).await;
        assert_eq!(injector(empty).await.inject(&mut ctx("/", &[], false), now).await, None);
    }

    #[tokio::test]
    async fn preview_of_unknown_outage_yields_nothing() {
        let now = Utc::now();
        let (store, _) = store_with(vec![]).await;
        let injector = injector(store).await;

        let mut ctx = ctx("/", &[(PREVIEW_PARAM, "999"), (DELTA_PARAM, "0")], true);
        assert_eq!(injector.inject(&mut ctx, now).await, None);
        assert!(!ctx.banner_emitted);
    }

    #[tokio::test]
    async fn preview_simulates_a_later_instant_for_operators_only() {
        let now = Utc::now();
        let (store, ids) = store_with(vec![draft_around(now, 3600, 7200, true, None)]).await;
        let injector = injector(store).await;
        let id = ids[0].to_string();

        let mut operator = ctx("/", &[(PREVIEW_PARAM, &id), (DELTA_PARAM, "3700")], true);
        let fragment = injector.inject(&mut operator, now).await.unwrap();
        assert!(fragment.contains("outage-preview"));
        assert!(fragment.contains("outage-ongoing"));

        let mut too_late = ctx("/", &[(PREVIEW_PARAM, &id), (DELTA_PARAM, "99999")], true);
        assert_eq!(injector.inject(&mut too_late, now).await, None);

        let mut garbage = ctx("/", &[(PREVIEW_PARAM, &id), (DELTA_PARAM, "soon")], true);
        assert_eq!(injector.inject(&mut garbage, now).await, None);

        let mut visitor = ctx("/", &[(PREVIEW_PARAM, &id), (DELTA_PARAM, "3700")], false);
        assert_eq!(injector.inject(&mut visitor, now).await, None);
    }

    #[tokio::test]
    async fn suppressed_only_on_the_additional_html_editor() {
        let now = Utc::now();
        let (store, _) = store_with(vec![draft_around(now, -100, 200, true, None)]).await;
        let injector = injector(store).await;

        let mut editor = ctx("/admin/settings", &[("section", "additionalhtml")], true);
        assert_eq!(injector.inject(&mut editor, now).await, None);

        let mut other_section = ctx("/admin/settings", &[("section", "outages")], true);
        assert!(injector.inject(&mut other_section, now).await.is_some());

        let mut other_admin_page = ctx("/admin/outages", &[], true);
        assert!(injector.inject(&mut other_admin_page, now).await.is_some());
    }

    #[tokio::test]
    async fn storage_failure_degrades_to_no_banner() {
        let injector = injector(Arc::new(BrokenStore)).await;
        let mut ctx = ctx("/", &[], false);
        assert_eq!(injector.inject(&mut ctx, Utc::now()).await, None);
    }

    #[tokio::test]
    async fn middleware_injects_into_html_only() {
        use crate::test_support::test_state;
        use axum::{routing::get, Router};
        use tower::ServiceExt;

        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let now = Utc::now();
        state
            .outages
            .store()
            .insert(&draft_around(now, -100, 200, true, None), None)
            .await
            .unwrap();

        let app = Router::new()
            .route(
                "/",
                get(|| async { axum::response::Html("<html><body><p>hello</p></body></html>") }),
            )
            .route("/data", get(|| async { axum::Json(serde_json::json!({"ok": true})) }))
            .layer(axum::middleware::from_fn_with_state(state.clone(), banner_middleware))
            .with_state(state);

        let response = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let declared_len = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .map(|v| v.to_str().unwrap().parse::<usize>().unwrap());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        if let Some(len) = declared_len {
            assert_eq!(len, html.len());
        }
        assert!(html.starts_with("<html><body><style>"));
        assert!(html.contains("id=\"outage-banner\""));
        assert!(html.ends_with("<p>hello</p></body></html>"));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/data").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn oversized_and_encoded_pages_pass_through_untouched() {
        use crate::test_support::test_state;
        use axum::{routing::get, Router};
        use tower::ServiceExt;

        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let now = Utc::now();
        state
            .outages
            .store()
            .insert(&draft_around(now, -100, 200, true, None), None)
            .await
            .unwrap();

        let large = format!(
            "<html><body>{}</body></html>",
            "x".repeat(MAX_HTML_BODY + 1024 * 1024)
        );
        let large_len = large.len();
        let app = Router::new()
            .route("/large", get(move || async move { axum::response::Html(large) }))
            .route(
                "/gzip",
                get(|| async {
                    (
                        [
                            (header::CONTENT_TYPE, "text/html"),
                            (header::CONTENT_ENCODING, "gzip"),
                        ],
                        vec![0x1f_u8, 0x8b, 0x08, 0x00],
                    )
                }),
            )
            .layer(axum::middleware::from_fn_with_state(state.clone(), banner_middleware))
            .with_state(state);

        let response = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/large").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), large_len);
        assert!(bytes.starts_with(b"<html><body>xxx"));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/gzip").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], &[0x1f_u8, 0x8b, 0x08, 0x00][..]);
    }
}
