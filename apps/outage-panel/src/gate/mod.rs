//! Request-time side of the maintenance gate.

pub mod loader;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use outage_core::{Caller, Gate, GateDecision};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

use crate::config::{GateMode, PanelConfig};
use crate::AppState;
pub use loader::{GateLoader, GateStatus};

pub const ACCESS_KEY_PARAM: &str = "accesskey";
pub const ACCESS_KEY_COOKIE: &str = "outage_accesskey";
const MAINTENANCE_HEADER: &str = "x-maintenance";
const APOLOGY: &str = "We are currently under maintenance, please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Interactive,
    /// Background, async or web-service calls.
    Machine,
}

pub fn classify_request(config: &PanelConfig, path: &str, headers: &HeaderMap) -> RequestKind {
    let is_xhr = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    let is_service_path = config
        .machine_path_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()));

    if is_xhr || is_service_path {
        RequestKind::Machine
    } else {
        RequestKind::Interactive
    }
}

/// The socket peer, or the forwarded client address when proxies are trusted.
pub fn client_ip(config: &PanelConfig, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    if config.trust_forwarded_headers {
        let forwarded = headers
            .get("cf-connecting-ip")
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.split(',').next())
            })
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer.map(|addr| addr.ip())
}

fn query_access_key(query: Option<&str>) -> Option<String> {
    let params: HashMap<String, String> = serde_urlencoded::from_str(query?).ok()?;
    params
        .get(ACCESS_KEY_PARAM)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

fn remembered_key_cookie(config: &PanelConfig, key: &str) -> Cookie<'static> {
    Cookie::build((ACCESS_KEY_COOKIE, key.to_string()))
        .path(config.cookie_path.clone())
        .max_age(time::Duration::hours(24))
        .secure(config.cookie_secure)
        .http_only(config.cookie_http_only)
        .build()
}

fn maintenance_headers(response: &mut Response, retry_after_secs: u64) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        headers.insert(header::RETRY_AFTER, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::EXPIRES,
        HeaderValue::from_static("Mon, 20 Aug 1969 09:23:00 GMT"),
    );
    headers.insert(MAINTENANCE_HEADER, HeaderValue::from_static("gate"));
}

/// The response a blocked caller receives under enforcement.
pub async fn blocked_response(config: &PanelConfig, kind: RequestKind) -> Response {
    let mut response = match kind {
        RequestKind::Machine => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        RequestKind::Interactive => match tokio::fs::read_to_string(&config.fallback_page_path).await {
            Ok(page) => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                page,
            )
                .into_response(),
            Err(e) => {
                debug!("Maintenance page unavailable ({}), sending plain apology", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    APOLOGY,
                )
                    .into_response()
            }
        },
    };
    maintenance_headers(&mut response, config.retry_after_secs);
    response
}

fn diagnostic_response(lines: Vec<String>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        lines.join("\n"),
    )
        .into_response()
}

/// Outcome of running the gate for one request, before any I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub decision: GateDecision,
    /// Set when a valid key came in through the query string.
    pub remember_key: Option<String>,
    pub diagnostics: Vec<String>,
}

pub fn run_gate(
    gate: &Gate,
    now: chrono::DateTime<Utc>,
    ip: Option<IpAddr>,
    param_key: Option<&str>,
    cookie_key: Option<&str>,
) -> GateOutcome {
    let caller = Caller {
        ip,
        access_key: param_key.or(cookie_key),
    };
    let decision = gate.decide(now, &caller);
    let remember_key = match decision {
        GateDecision::OutsideWindow => None,
        _ => param_key.filter(|k| gate.key_matches(k)).map(str::to_string),
    };
    let diagnostics = match &decision {
        GateDecision::Blocked(checks) => checks.diagnostics(&caller),
        _ => Vec::new(),
    };
    GateOutcome {
        decision,
        remember_key,
        diagnostics,
    }
}

pub async fn gate_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let config = &state.config;
    let gate = match state.gate.current().await {
        GateStatus::Absent => return next.run(req).await,
        GateStatus::Loaded(gate) => gate,
        GateStatus::Invalid => {
            let kind = classify_request(config, req.uri().path(), req.headers());
            warn!("Blocking {} on unusable gate artifact", req.uri().path());
            let mut response = match kind {
                RequestKind::Machine => StatusCode::SERVICE_UNAVAILABLE.into_response(),
                RequestKind::Interactive => (StatusCode::SERVICE_UNAVAILABLE, APOLOGY).into_response(),
            };
            maintenance_headers(&mut response, config.retry_after_secs);
            return response;
        }
    };

    let now = Utc::now();
    if !gate.in_window(now) {
        return next.run(req).await;
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(config, req.headers(), peer);
    let param_key = query_access_key(req.uri().query());
    let cookie_key = jar.get(ACCESS_KEY_COOKIE).map(|c| c.value().to_string());
    let outcome = run_gate(&gate, now, ip, param_key.as_deref(), cookie_key.as_deref());

    let jar = match &outcome.remember_key {
        Some(key) => jar.add(remembered_key_cookie(config, key)),
        None => jar,
    };

    match outcome.decision {
        GateDecision::OutsideWindow | GateDecision::Allowed(_) => {
            let response = next.run(req).await;
            (jar, response).into_response()
        }
        GateDecision::Blocked(_) => {
            debug!("Gate blocked {} from {:?}", req.uri().path(), ip);
            let response = match config.gate_mode {
                GateMode::Diagnostic => diagnostic_response(outcome.diagnostics),
                GateMode::Enforce => {
                    let kind = classify_request(config, req.uri().path(), req.headers());
                    blocked_response(config, kind).await
                }
            };
            (jar, response).into_response()
        }
    }
}
