//! `POST /token` — code and refresh-token grants.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::pkce::{constant_time_eq, verify_s256};
use crate::app::App;
use crate::config::limits;
use crate::error::OAuthError;
use crate::oauth::jwt::ClaimInput;
use crate::oauth::types::IdentityClaims;

/// Accepts both `application/x-www-form-urlencoded` (the RFC 6749 default)
/// and JSON bodies. Every field is optional at the type level; presence is
/// checked per grant type below.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
}

/// `POST /token`. Axum's `Json`/`Form` extractors require knowing the content
/// type ahead of time; dispatch on `Content-Type` manually so both encodings
/// are accepted on the same route.
pub async fn token(State(app): State<Arc<App>>, headers: axum::http::HeaderMap, body: axum::body::Bytes) -> Response {
    let is_json = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    let req: TokenRequest = if is_json {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(_) => return OAuthError::InvalidRequest("malformed JSON body".into()).into_response(),
        }
    } else {
        match serde_urlencoded::from_bytes(&body) {
            Ok(req) => req,
            Err(_) => return OAuthError::InvalidRequest("malformed form body".into()).into_response(),
        }
    };

    match req.grant_type.as_deref() {
        Some("authorization_code") => authorization_code_grant(&app, req).await,
        Some("refresh_token") => refresh_token_grant(&app, req).await,
        Some(other) => OAuthError::UnsupportedGrantType(other.to_string()).into_response(),
        None => OAuthError::InvalidRequest("missing grant_type".into()).into_response(),
    }
}

async fn authorization_code_grant(app: &App, req: TokenRequest) -> Response {
    let (Some(code), Some(redirect_uri), Some(client_id), Some(code_verifier)) =
        (req.code, req.redirect_uri, req.client_id, req.code_verifier)
    else {
        return OAuthError::InvalidRequest(
            "authorization_code grant requires code, redirect_uri, client_id, code_verifier".into(),
        )
        .into_response();
    };

    let Some(client) = app.oauth_store.get_client(&client_id).await else {
        return OAuthError::InvalidClient("unknown client_id".into()).into_response();
    };
    if let Err(e) = authenticate_client(&client, req.client_secret.as_deref()) {
        return e.into_response();
    }

    // Atomic check-and-mark: two concurrent exchanges of the same code cannot both win.
    let Some(auth_code) = app.oauth_store.consume_auth_code(&code).await else {
        return OAuthError::InvalidGrant("code unknown, expired, or already used".into()).into_response();
    };

    if auth_code.client_id != client_id || auth_code.redirect_uri != redirect_uri {
        return OAuthError::InvalidGrant("code does not match client or redirect_uri".into()).into_response();
    }
    if !verify_s256(&code_verifier, &auth_code.code_challenge) {
        return OAuthError::InvalidGrant("PKCE verification failed".into()).into_response();
    }

    issue_token_pair(app, &auth_code.client_id, &auth_code.user_id, &auth_code.scope, &auth_code.identity).await
}

async fn refresh_token_grant(app: &App, req: TokenRequest) -> Response {
    let (Some(refresh_token), Some(client_id)) = (req.refresh_token, req.client_id) else {
        return OAuthError::InvalidRequest("refresh_token grant requires refresh_token, client_id".into())
            .into_response();
    };

    let Some(client) = app.oauth_store.get_client(&client_id).await else {
        return OAuthError::InvalidClient("unknown client_id".into()).into_response();
    };
    if let Err(e) = authenticate_client(&client, req.client_secret.as_deref()) {
        return e.into_response();
    }

    // Rotation: the old record is gone the instant this call returns Some, so any
    // replay of the same plaintext afterwards is a guaranteed miss.
    let Some(old) = app.oauth_store.consume_refresh_token(&refresh_token).await else {
        return OAuthError::InvalidGrant("refresh token unknown, expired, or already rotated".into()).into_response();
    };
    if old.client_id != client_id {
        return OAuthError::InvalidGrant("refresh token does not belong to this client".into()).into_response();
    }

    issue_token_pair(app, &old.client_id, &old.user_id, &old.scope, &old.identity).await
}

async fn issue_token_pair(
    app: &App,
    client_id: &str,
    user_id: &str,
    scope: &str,
    identity: &IdentityClaims,
) -> Response {
    let access_token = app.jwt.mint(
        &ClaimInput {
            sub: user_id,
            scope,
            provider: identity.provider.as_deref(),
            email: identity.email.as_deref(),
            name: identity.name.as_deref(),
            role: identity.role.as_deref(),
        },
        limits::ACCESS_TOKEN_TTL,
    );
    let refresh_token = app
        .oauth_store
        .create_refresh_token(client_id.to_string(), user_id.to_string(), scope.to_string(), identity.clone())
        .await;

    Json(serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": limits::ACCESS_TOKEN_TTL.as_secs(),
        "refresh_token": refresh_token,
        "scope": scope,
    }))
    .into_response()
}

/// `client_secret_post` clients must present a matching secret (constant-time
/// compare); `none` (public) clients present no secret — PKCE is their sole
/// proof of possession.
fn authenticate_client(client: &super::types::OAuthClient, presented_secret: Option<&str>) -> Result<(), OAuthError> {
    let Some(ref expected) = client.client_secret else {
        return Ok(());
    };
    match presented_secret {
        Some(secret) if constant_time_eq(secret, expected) => Ok(()),
        _ => Err(OAuthError::InvalidClient("client secret mismatch".into())),
    }
}

impl IntoResponse for &OAuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.code(), "error_description": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::types::OAuthClient;
    use chrono::Utc;

    fn confidential_client() -> OAuthClient {
        OAuthClient {
            client_id: "c1".into(),
            client_secret: Some("shh".into()),
            client_name: None,
            redirect_uris: vec!["https://client.example/cb".into()],
            token_endpoint_auth_method: "client_secret_post".into(),
            grant_types: vec!["authorization_code".into(), "refresh_token".into()],
            response_types: vec!["code".into()],
            scope: "tools:invoke".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn confidential_client_requires_matching_secret() {
        let client = confidential_client();
        assert!(authenticate_client(&client, Some("shh")).is_ok());
        assert!(authenticate_client(&client, Some("wrong")).is_err());
        assert!(authenticate_client(&client, None).is_err());
    }

    #[test]
    fn public_client_requires_no_secret() {
        let mut client = confidential_client();
        client.client_secret = None;
        assert!(authenticate_client(&client, None).is_ok());
    }
}
