//! Dynamic Client Registration (RFC 7591).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::app::App;
use crate::error::OAuthError;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: Option<String>,
    pub scope: Option<String>,
}

/// `POST /register`
pub async fn register(State(app): State<Arc<App>>, body: axum::body::Bytes) -> Response {
    let req: RegisterRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return OAuthError::InvalidClientMetadata(format!("malformed JSON body: {e}"))
                .into_response()
        }
    };

    let redirect_uris = req.redirect_uris.unwrap_or_default();
    if redirect_uris.is_empty() {
        return OAuthError::InvalidClientMetadata("redirect_uris is required and non-empty".into())
            .into_response();
    }
    for uri in &redirect_uris {
        if !is_absolute_uri(uri) {
            return OAuthError::InvalidClientMetadata(format!("redirect_uris entry is not absolute: {uri}"))
                .into_response();
        }
    }

    let auth_method = req.token_endpoint_auth_method.unwrap_or_else(|| "client_secret_post".into());
    let grant_types = if req.grant_types.is_empty() {
        vec!["authorization_code".into(), "refresh_token".into()]
    } else {
        req.grant_types
    };
    let response_types = if req.response_types.is_empty() { vec!["code".into()] } else { req.response_types };
    let scope = req.scope.unwrap_or_else(|| "tools:invoke".into());

    let client = app
        .oauth_store
        .register_client(req.client_name, redirect_uris, auth_method, grant_types, response_types, scope)
        .await;

    tracing::info!(client_id = %client.client_id, "registered OAuth client");

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "client_id": client.client_id,
            "client_secret": client.client_secret,
            "client_id_issued_at": client.created_at.timestamp(),
            "client_name": client.client_name,
            "redirect_uris": client.redirect_uris,
            "grant_types": client.grant_types,
            "response_types": client.response_types,
            "token_endpoint_auth_method": client.token_endpoint_auth_method,
            "scope": client.scope,
        })),
    )
        .into_response()
}

fn is_absolute_uri(uri: &str) -> bool {
    url::Url::parse(uri).is_ok()
}
