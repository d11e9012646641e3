//! Session bridge: pairs the parked `mcp_session_id` cookie with a completed
//! human login (password, Google, GitHub, or — opt-in only — a zero-network
//! dev identity), then hands off to [`super::authorize::complete_bridge`].
//!
//! The login page itself is hand-rolled HTML with manual escaping — no
//! templating engine dependency for one form.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{self, Cookie, CookieJar};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, Scope, TokenResponse};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::authorize::{complete_bridge, BROWSER_COOKIE, SESSION_COOKIE};
use super::types::{IdentityClaims, LoginProvider, SessionStatus};
use crate::app::App;
use crate::config::limits;
use crate::upstream::UpstreamIdentity;

/// State parked between redirecting to a third-party provider and its callback:
/// the CSRF token doubles as the lookup key, the PKCE verifier is needed to
/// complete that provider's own code exchange, and `session_id` re-links back
/// to the parked MCP authorization.
pub struct PendingProviderLogin {
    pub pkce_verifier: PkceCodeVerifier,
    pub session_id: String,
}

/// In-memory correlation table for in-flight Google/GitHub redirects.
/// Short-lived by construction — entries are removed on callback (success or
/// failure), so a background sweep is unnecessary at the scale this portal runs at.
#[derive(Default)]
pub struct PendingProviderLogins(RwLock<HashMap<String, PendingProviderLogin>>);

impl PendingProviderLogins {
    pub async fn insert(&self, csrf_secret: String, pending: PendingProviderLogin) {
        self.0.write().await.insert(csrf_secret, pending);
    }

    pub async fn take(&self, csrf_secret: &str) -> Option<PendingProviderLogin> {
        self.0.write().await.remove(csrf_secret)
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginPageQuery {
    pub error: Option<String>,
}

/// `GET /login` — render the login form for the session parked by the
/// `mcp_session_id` cookie.
pub async fn login_page(State(app): State<Arc<App>>, Query(q): Query<LoginPageQuery>, jar: CookieJar) -> Response {
    let Some(session_id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        return bad_request("no pending authorization session");
    };
    let Some(session) = app.oauth_store.get_session(&session_id).await else {
        return bad_request("authorization session expired, please restart the connection");
    };
    let client_name = app
        .oauth_store
        .get_client(&session.client_id)
        .await
        .and_then(|c| c.client_name)
        .unwrap_or_else(|| session.client_id.clone());

    Html(render_login_page(
        &client_name,
        &session.client_id,
        &session.state,
        app.google_client.is_some(),
        app.github_client.is_some(),
        app.config.auth.dev_login,
        q.error.as_deref(),
    ))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct PasswordLoginForm {
    pub email: String,
    pub password: String,
}

/// `POST /login/password`
pub async fn login_password(
    State(app): State<Arc<App>>,
    jar: CookieJar,
    axum::Form(form): axum::Form<PasswordLoginForm>,
) -> Response {
    let Some(session_id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        return bad_request("no pending authorization session");
    };
    let Some(session) = app.oauth_store.get_session(&session_id).await else {
        return bad_request("authorization session expired, please restart the connection");
    };

    let body = serde_json::json!({
        "provider": LoginProvider::Password.as_str(),
        "email": form.email,
        "password": form.password,
    });

    match app.upstream.exchange_identity(&body).await {
        Ok(identity) => complete_login(&app, jar, session_id, identity).await,
        Err(e) => {
            tracing::warn!(error = %e, "password login rejected by upstream");
            let client_name = app
                .oauth_store
                .get_client(&session.client_id)
                .await
                .and_then(|c| c.client_name)
                .unwrap_or_else(|| session.client_id.clone());
            Html(render_login_page(
                &client_name,
                &session.client_id,
                &session.state,
                app.google_client.is_some(),
                app.github_client.is_some(),
                app.config.auth.dev_login,
                Some("invalid email or password"),
            ))
            .into_response()
        }
    }
}

/// `GET /login/{provider}` — redirect to the provider's own authorize
/// endpoint, correlating back to the parked session via CSRF state.
pub async fn login_provider_redirect(
    State(app): State<Arc<App>>,
    AxumPath(provider): AxumPath<String>,
    jar: CookieJar,
) -> Response {
    let Some(provider) = parse_provider(&provider) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(session_id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        return bad_request("no pending authorization session");
    };
    let client = match provider {
        LoginProvider::Google => app.google_client.as_ref(),
        LoginProvider::Github => app.github_client.as_ref(),
        _ => None,
    };
    let Some(client) = client else {
        return bad_request("provider not configured");
    };

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf_token) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("email".to_string()))
        .set_pkce_challenge(pkce_challenge)
        .url();

    app.pending_provider_logins
        .insert(csrf_token.secret().clone(), PendingProviderLogin { pkce_verifier, session_id })
        .await;

    Redirect::to(auth_url.as_str()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ProviderCallbackQuery {
    pub code: String,
    pub state: String,
}

/// `GET /auth/{provider}/callback`
pub async fn provider_callback(
    State(app): State<Arc<App>>,
    AxumPath(provider): AxumPath<String>,
    Query(query): Query<ProviderCallbackQuery>,
    jar: CookieJar,
) -> Response {
    let Some(provider) = parse_provider(&provider) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(pending) = app.pending_provider_logins.take(&query.state).await else {
        return bad_request("invalid or expired OAuth state");
    };

    let client = match provider {
        LoginProvider::Google => app.google_client.as_ref(),
        LoginProvider::Github => app.github_client.as_ref(),
        _ => None,
    };
    let Some(client) = client else {
        return bad_request("provider not configured");
    };

    let token = match client
        .exchange_code(AuthorizationCode::new(query.code))
        .set_pkce_verifier(pending.pkce_verifier)
        .request_async(async_http_client)
        .await
    {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(error = %e, provider = provider.as_str(), "provider code exchange failed");
            return bad_request("provider login failed");
        }
    };

    let body = serde_json::json!({
        "provider": provider.as_str(),
        "external_token": token.access_token().secret(),
    });

    match app.upstream.exchange_identity(&body).await {
        Ok(identity) => complete_login(&app, jar, pending.session_id, identity).await,
        Err(e) => {
            tracing::warn!(error = %e, provider = provider.as_str(), "upstream rejected provider identity");
            bad_request("login failed")
        }
    }
}

fn parse_provider(raw: &str) -> Option<LoginProvider> {
    match raw {
        "google" => Some(LoginProvider::Google),
        "github" => Some(LoginProvider::Github),
        _ => None,
    }
}

/// `GET /login/dev` — only reachable when `auth.dev_login` is enabled.
/// Completes the bridge for a fixed development identity without any
/// network call.
pub async fn login_dev(State(app): State<Arc<App>>, jar: CookieJar) -> Response {
    if !app.config.auth.dev_login {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(session_id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        return bad_request("no pending authorization session");
    };
    let identity = UpstreamIdentity {
        user_id: "dev-user".to_string(),
        email: Some("dev@localhost".to_string()),
        name: Some("Dev User".to_string()),
        provider: Some(LoginProvider::Dev.as_str().to_string()),
        role: Some("admin".to_string()),
    };
    complete_login(&app, jar, session_id, identity).await
}

/// Mint the `vire_session` cookie for the authenticated identity and, if the
/// session carries a pending MCP authorization, complete it.
async fn complete_login(app: &App, jar: CookieJar, session_id: String, identity: UpstreamIdentity) -> Response {
    let Some(session) = app.oauth_store.get_session(&session_id).await else {
        return bad_request("authorization session expired, please restart the connection");
    };
    if matches!(session.status, SessionStatus::Consumed) {
        return bad_request("authorization session already consumed");
    }

    let token = app.jwt.mint(
        &crate::oauth::jwt::ClaimInput {
            sub: &identity.user_id,
            scope: &session.scope,
            provider: identity.provider.as_deref(),
            email: identity.email.as_deref(),
            name: identity.name.as_deref(),
            role: identity.role.as_deref(),
        },
        limits::ACCESS_TOKEN_TTL,
    );

    let mut browser_cookie = Cookie::new(BROWSER_COOKIE, token);
    browser_cookie.set_http_only(true);
    browser_cookie.set_path("/");
    browser_cookie.set_same_site(Some(cookie::SameSite::Lax));
    let jar = jar.add(browser_cookie);

    let claims = IdentityClaims {
        provider: identity.provider.clone(),
        email: identity.email.clone(),
        name: identity.name.clone(),
        role: identity.role.clone(),
    };
    let redirect = complete_bridge(app, session, identity.user_id, claims).await;
    (jar, redirect).into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Html(format!(
            "<!DOCTYPE html><html><body><h1>Bad request</h1><p>{}</p></body></html>",
            html_escape(message)
        )),
    )
        .into_response()
}

/// Render the login page. All interpolated values are HTML-escaped.
#[allow(clippy::too_many_arguments)]
fn render_login_page(
    client_name: &str,
    client_id: &str,
    state: &str,
    google_enabled: bool,
    github_enabled: bool,
    dev_enabled: bool,
    error_message: Option<&str>,
) -> String {
    let error_html = error_message
        .map(|msg| {
            format!(
                r#"<div style="background:#fee;border:1px solid #c00;color:#c00;padding:10px;border-radius:4px;margin-bottom:16px">{}</div>"#,
                html_escape(msg)
            )
        })
        .unwrap_or_default();

    let google_link = if google_enabled { r#"<a class="provider-link" href="/login/google">Continue with Google</a>"# } else { "" };
    let github_link = if github_enabled { r#"<a class="provider-link" href="/login/github">Continue with GitHub</a>"# } else { "" };
    let dev_link = if dev_enabled { r#"<a class="provider-link" href="/login/dev">Continue with dev identity</a>"# } else { "" };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authorize - Vire Portal</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 400px; width: 100%; }}
h1 {{ font-size: 20px; margin: 0 0 8px; color: #333; }}
.subtitle {{ color: #666; font-size: 14px; margin: 0 0 24px; }}
label {{ display: block; font-size: 14px; font-weight: 500; margin-bottom: 6px; color: #333; }}
input {{ width: 100%; padding: 10px; border: 1px solid #ddd; border-radius: 4px; font-size: 14px; box-sizing: border-box; margin-bottom: 12px; }}
input:focus {{ outline: none; border-color: #4a90d9; box-shadow: 0 0 0 2px rgba(74,144,217,0.2); }}
button {{ width: 100%; padding: 10px; background: #4a90d9; color: #fff; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; margin-top: 4px; }}
button:hover {{ background: #357abd; }}
.provider-link {{ display: block; text-align: center; margin-top: 12px; font-size: 14px; color: #4a90d9; text-decoration: none; }}
</style>
</head>
<body>
<div class="card">
<h1>Vire Portal</h1>
<p class="subtitle"><strong>{client_name}</strong> is requesting access</p>
{error_html}
<form method="POST" action="/login/password">
<input type="hidden" name="client_id" value="{client_id_escaped}">
<input type="hidden" name="state" value="{state_escaped}">
<label for="email">Email</label>
<input type="email" id="email" name="email" required autofocus>
<label for="password">Password</label>
<input type="password" id="password" name="password" required>
<button type="submit">Sign in</button>
</form>
{google_link}
{github_link}
{dev_link}
</div>
</body>
</html>"#,
        client_name = html_escape(client_name),
        error_html = error_html,
        client_id_escaped = html_escape(client_id),
        state_escaped = html_escape(state),
        google_link = google_link,
        github_link = github_link,
        dev_link = dev_link,
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Build a Google `BasicClient` from configured app credentials.
#[must_use]
pub fn build_google_client(client_id: &str, client_secret: &str, redirect_base: &str) -> BasicClient {
    BasicClient::new(
        oauth2::ClientId::new(client_id.to_string()),
        Some(oauth2::ClientSecret::new(client_secret.to_string())),
        oauth2::AuthUrl::new("https://accounts.google.com/o/oauth2/v2/auth".to_string())
            .expect("static Google authorize URL is valid"),
        Some(
            oauth2::TokenUrl::new("https://oauth2.googleapis.com/token".to_string())
                .expect("static Google token URL is valid"),
        ),
    )
    .set_redirect_uri(
        oauth2::RedirectUrl::new(format!("{redirect_base}/auth/google/callback"))
            .expect("configured portal issuer URL forms a valid redirect URL"),
    )
}

/// Build a GitHub `BasicClient` from configured app credentials.
#[must_use]
pub fn build_github_client(client_id: &str, client_secret: &str, redirect_base: &str) -> BasicClient {
    BasicClient::new(
        oauth2::ClientId::new(client_id.to_string()),
        Some(oauth2::ClientSecret::new(client_secret.to_string())),
        oauth2::AuthUrl::new("https://github.com/login/oauth/authorize".to_string())
            .expect("static GitHub authorize URL is valid"),
        Some(
            oauth2::TokenUrl::new("https://github.com/login/oauth/access_token".to_string())
                .expect("static GitHub token URL is valid"),
        ),
    )
    .set_redirect_uri(
        oauth2::RedirectUrl::new(format!("{redirect_base}/auth/github/callback"))
            .expect("configured portal issuer URL forms a valid redirect URL"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escape_neutralizes_script_tags() {
        assert_eq!(
            html_escape(r#"<script>alert("xss")</script>"#),
            "&lt;script&gt;alert(&quot;xss&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn render_without_error_omits_error_banner() {
        let html = render_login_page("Test App", "client123", "state1", true, true, false, None);
        assert!(html.contains("Test App"));
        assert!(html.contains("Continue with Google"));
        assert!(!html.contains("background:#fee"));
    }

    #[test]
    fn render_with_error_includes_banner() {
        let html = render_login_page("App", "id", "st", false, false, false, Some("Wrong password"));
        assert!(html.contains("Wrong password"));
        assert!(html.contains("background:#fee"));
        assert!(!html.contains("Continue with Google"));
    }

    #[test]
    fn dev_link_only_rendered_when_enabled() {
        let html = render_login_page("App", "id", "st", false, false, true, None);
        assert!(html.contains("Continue with dev identity"));
    }

    #[test]
    fn parse_provider_rejects_unknown() {
        assert!(parse_provider("facebook").is_none());
        assert!(matches!(parse_provider("google"), Some(LoginProvider::Google)));
    }
}
