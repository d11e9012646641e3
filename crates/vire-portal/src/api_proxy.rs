//! `/api/*` browser read-through proxy.
//!
//! Forwards any method/path under `/api/` to upstream, layering the response
//! cache in front of `GET` requests. `/api/internal/*` is blocked here at the
//! router boundary — a literal prefix check that runs before any forwarding
//! logic, not a best-effort filter.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;

use crate::app::App;
use crate::oauth::authorize::BROWSER_COOKIE;

/// `{method} /api/{*rest}` — the generic browser proxy entry point.
pub async fn proxy(
    State(app): State<Arc<App>>,
    method: Method,
    Path(rest): Path<String>,
    RawQuery(query): RawQuery,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/{rest}");
    if path.starts_with("/api/internal/") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let user_id = match resolve_user(&app, &jar, &headers) {
        Some(id) => id,
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let request_uri = match &query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.clone(),
    };
    let cache_key = crate::cache::ResponseCache::key(&user_id, method.as_str(), &request_uri);

    if method == Method::GET {
        if let Some(entry) = app.cache.get(&cache_key).await {
            let mut response = (StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK), entry.body).into_response();
            for (name, value) in &entry.headers {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::try_from(name.as_str()),
                    axum::http::HeaderValue::try_from(value.as_str()),
                ) {
                    response.headers_mut().insert(name, value);
                }
            }
            return response;
        }
    }

    let upstream_body = (!body.is_empty())
        .then(|| serde_json::from_slice::<serde_json::Value>(&body).ok())
        .flatten();

    let proxy_headers: Vec<(&str, String)> = vec![("X-Vire-User-ID", crate::upstream::sanitize_header_value(&user_id))];

    let result = app
        .upstream
        .proxy_request(
            method.clone(),
            &request_uri,
            upstream_body,
            &proxy_headers,
            crate::config::limits::UPSTREAM_TIMEOUT,
            crate::config::limits::CACHE_BODY_CAP * 4,
        )
        .await;

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(error = %e, path = %request_uri, "api proxy call failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    if method != Method::GET {
        app.cache.invalidate_prefix(&path).await;
    } else if resp.is_success() {
        app.cache.insert(cache_key, resp.status, vec![], resp.body.clone()).await;
    }

    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, resp.body).into_response()
}

/// Resolve the acting user from `Authorization: Bearer` or the `vire_session`
/// cookie, same precedence as the MCP gate minus the RFC 9728 challenge,
/// since this is a same-origin browser path rather than an MCP tool call.
fn resolve_user(app: &App, jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if let Some(claims) = app.jwt.validate(token) {
            return Some(claims.sub);
        }
    }
    let cookie = jar.get(BROWSER_COOKIE)?;
    app.jwt.validate(cookie.value()).map(|claims| claims.sub)
}
