//! `GET /authorize` — the MCP-client authorization entry point and session
//! bridge state machine.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{self, Cookie, CookieJar};
use serde::Deserialize;

use super::types::{AuthSession, IdentityClaims};
use crate::app::App;
use crate::config::limits;

pub const SESSION_COOKIE: &str = "mcp_session_id";
pub const BROWSER_COOKIE: &str = "vire_session";

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
}

/// `GET /authorize`
pub async fn authorize(
    State(app): State<Arc<App>>,
    Query(query): Query<AuthorizeQuery>,
    jar: CookieJar,
) -> Response {
    let Some(client_id) = query.client_id.clone() else {
        return bad_request_html("missing client_id");
    };
    let Some(redirect_uri) = query.redirect_uri.clone() else {
        return bad_request_html("missing redirect_uri");
    };
    if query.response_type.as_deref() != Some("code") {
        return bad_request_html("response_type must be 'code'");
    }
    let Some(code_challenge) = query.code_challenge.clone() else {
        return bad_request_html("PKCE code_challenge is mandatory");
    };
    if query.code_challenge_method.as_deref() != Some("S256") {
        return bad_request_html("code_challenge_method must be 'S256'");
    }

    let client = match app.oauth_store.get_client(&client_id).await {
        Some(client) => client,
        None if app.config.auth.lenient_client_registration => {
            app.oauth_store.auto_register_client(&client_id, &redirect_uri).await
        }
        None => return bad_request_html("unknown client_id"),
    };

    // Exact match only — a prefix/substring match is not acceptable here.
    if !client.has_redirect_uri(&redirect_uri) {
        return bad_request_html("redirect_uri not registered for this client");
    }

    let scope = query.scope.clone().unwrap_or_else(|| "tools:invoke".into());
    let state_param = query.state.clone().unwrap_or_default();

    let session = app
        .oauth_store
        .create_session(client_id, redirect_uri, scope, state_param, code_challenge, "S256".into())
        .await;

    let mut session_cookie = Cookie::new(SESSION_COOKIE, session.session_id.clone());
    session_cookie.set_http_only(true);
    session_cookie.set_path("/");
    session_cookie.set_max_age(cookie::time::Duration::seconds(limits::AUTH_SESSION_TTL.as_secs() as i64));
    let jar = jar.add(session_cookie);

    // A valid `vire_session` cookie means the browser already has a completed
    // login — complete the bridge immediately without showing the login page.
    if let Some(cookie) = jar.get(BROWSER_COOKIE) {
        if let Some(claims) = app.jwt.validate(cookie.value()) {
            let identity = IdentityClaims {
                provider: claims.provider,
                email: claims.email,
                name: claims.name,
                role: claims.role,
            };
            return complete_bridge(&app, session, claims.sub, identity).await.into_response();
        }
    }

    (jar, Redirect::to("/login")).into_response()
}

/// Transition a pending session to `Authenticated`, issue the authorization
/// code, delete the session, and redirect to the client's `redirect_uri`.
/// Shared between the direct-cookie fast path above and every login-provider
/// callback in [`super::login`].
pub async fn complete_bridge(app: &App, session: AuthSession, user_id: String, identity: IdentityClaims) -> Redirect {
    let code = app
        .oauth_store
        .create_auth_code(
            session.client_id.clone(),
            user_id,
            session.redirect_uri.clone(),
            session.scope.clone(),
            session.code_challenge.clone(),
            session.code_challenge_method.clone(),
            identity,
        )
        .await;

    app.oauth_store.delete_session(&session.session_id).await;

    tracing::info!(client_id = %session.client_id, "authorization completed, code issued");

    let mut redirect_url = session.redirect_uri.clone();
    redirect_url.push_str(if redirect_url.contains('?') { "&" } else { "?" });
    redirect_url.push_str(&format!("code={}", url_encode(&code.code)));
    if !session.state.is_empty() {
        redirect_url.push_str(&format!("&state={}", url_encode(&session.state)));
    }
    Redirect::to(&redirect_url)
}

fn bad_request_html(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, format!("<!DOCTYPE html><html><body><h1>Bad request</h1><p>{message}</p></body></html>"))
        .into_response()
}

/// Percent-encode a string for use in a URL query parameter. Hand-rolled: a
/// single call site does not justify pulling in `percent-encoding` when
/// `serde_urlencoded` already covers form bodies elsewhere.
fn url_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encode_preserves_unreserved_and_escapes_rest() {
        assert_eq!(url_encode("abc-123_.~"), "abc-123_.~");
        assert_eq!(url_encode("a b"), "a%20b");
        assert_eq!(url_encode("xyz&state"), "xyz%26state");
    }
}
