use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use crate::config::PanelConfig;
use crate::AppState;

pub const OPERATOR_COOKIE: &str = "outage_admin";
const OPERATOR_ID_HEADER: &str = "x-operator-id";

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Operators present the admin token as a bearer token or in the `outage_admin` cookie.
pub fn is_operator(config: &PanelConfig, headers: &HeaderMap, jar: &CookieJar) -> bool {
    let expected = config.admin_token.trim();
    if expected.is_empty() {
        return false;
    }

    if extract_bearer_token(headers).is_some_and(|token| token.trim() == expected) {
        return true;
    }
    jar.get(OPERATOR_COOKIE)
        .is_some_and(|cookie| cookie.value() == expected)
}

/// Numeric operator id recorded as author of changes, if the caller sent one.
pub fn operator_id(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(OPERATOR_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

pub async fn require_operator(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !is_operator(&state.config, req.headers(), &jar) {
        warn!("Rejected operator request to {}", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}
