use crate::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderName, StatusCode},
    response::{Html, IntoResponse, Response},
};
use std::time::Duration;

const MAX_PROXY_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Upstream bodies must come back uncompressed so HTML can be rewritten.
fn should_skip_request_header(name: &HeaderName) -> bool {
    let key = name.as_str();
    key.eq_ignore_ascii_case("host")
        || key.eq_ignore_ascii_case("connection")
        || key.eq_ignore_ascii_case("transfer-encoding")
        || key.eq_ignore_ascii_case("content-length")
        || key.eq_ignore_ascii_case("accept-encoding")
}

fn should_skip_response_header(name: &HeaderName) -> bool {
    let key = name.as_str();
    key.eq_ignore_ascii_case("connection")
        || key.eq_ignore_ascii_case("transfer-encoding")
        || key.eq_ignore_ascii_case("content-length")
}

const PLACEHOLDER_PAGE: &str = "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\"><title>Site</title></head>\n<body><main><p>No upstream site is configured.</p></main></body></html>\n";

/// Everything that is not the panel's own API goes to the protected site.
pub async fn site_handler(State(state): State<AppState>, req: Request) -> Response {
    let Some(upstream) = state.config.upstream_url.clone() else {
        return Html(PLACEHOLDER_PAGE).into_response();
    };

    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target_url = format!("{}{}", upstream, path_and_query);

    let body_bytes = match to_bytes(body, MAX_PROXY_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!("Proxy request body read failed: {}", err);
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body is too large for proxy",
            )
                .into_response();
        }
    };

    tracing::debug!("Proxying request to: {}", target_url);
    let mut proxy_req = state
        .http
        .request(parts.method.clone(), &target_url)
        .timeout(Duration::from_secs(30))
        .body(body_bytes);
    for (key, value) in &parts.headers {
        if should_skip_request_header(key) {
            continue;
        }
        proxy_req = proxy_req.header(key, value);
    }

    let res = match proxy_req.send().await {
        Ok(res) => res,
        Err(err) => {
            tracing::error!("Upstream request failed for {}: {}", target_url, err);
            return (StatusCode::BAD_GATEWAY, "Upstream site is unavailable").into_response();
        }
    };

    let status = res.status();
    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        for (key, value) in res.headers() {
            if should_skip_response_header(key) {
                continue;
            }
            headers.append(key, value.clone());
        }
    }

    let bytes = match res.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!("Upstream body read failed for {}: {}", target_url, err);
            return (StatusCode::BAD_GATEWAY, "Upstream site is unavailable").into_response();
        }
    };

    response.body(Body::from(bytes)).unwrap_or_else(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            "Failed to build response",
        )
            .into_response()
    })
}
