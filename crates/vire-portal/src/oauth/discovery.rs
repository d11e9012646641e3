//! Discovery endpoints: RFC 8414 authorization server metadata and RFC 9728
//! protected resource metadata. Both are cacheable for 1 hour and carry no
//! state.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app::App;
use crate::config::limits;

fn cache_control_header() -> (header::HeaderName, HeaderValue) {
    (
        header::CACHE_CONTROL,
        HeaderValue::from_str(&format!("max-age={}", limits::DISCOVERY_CACHE_SECONDS))
            .expect("formatted max-age is always a valid header value"),
    )
}

/// `GET /.well-known/oauth-authorization-server`
pub async fn authorization_server_metadata(State(app): State<Arc<App>>) -> Response {
    let issuer = app.config.issuer_url();
    let mut response = Json(serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "registration_endpoint": format!("{issuer}/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["client_secret_post", "none"],
        "scopes_supported": ["tools:invoke"],
    }))
    .into_response();
    let (name, value) = cache_control_header();
    response.headers_mut().insert(name, value);
    response
}

/// `GET /.well-known/oauth-protected-resource`
pub async fn protected_resource_metadata(State(app): State<Arc<App>>) -> Response {
    let issuer = app.config.issuer_url();
    let mut response = Json(serde_json::json!({
        "resource": issuer,
        "authorization_servers": [issuer],
        "bearer_methods_supported": ["header"],
        "scopes_supported": ["tools:invoke"],
    }))
    .into_response();
    let (name, value) = cache_control_header();
    response.headers_mut().insert(name, value);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_control_header_matches_configured_ttl() {
        let (name, value) = cache_control_header();
        assert_eq!(name, header::CACHE_CONTROL);
        assert_eq!(value.to_str().unwrap(), "max-age=3600");
    }
}
