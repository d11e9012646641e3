//! Full end-to-end HTTP tests for the OAuth 2.1 authorization flow, the
//! dev-login session bridge, and the MCP endpoint they unlock. Drives
//! `App::router()` directly with `tower::ServiceExt::oneshot` rather than
//! binding a real listener.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use vire_portal::app::App;
use vire_portal::config::{ApiConfig, AuthConfig, CacheConfig, Config, ServerConfig, ServiceConfig, UserConfig};

fn test_config() -> Config {
    Config {
        server: ServerConfig { host: "127.0.0.1".into(), port: 0 },
        auth: AuthConfig {
            jwt_secret: "test-signing-secret".into(),
            portal_url: Some("https://portal.example".into()),
            lenient_client_registration: false,
            dev_login: true,
            google: None,
            github: None,
        },
        api: ApiConfig { url: String::new() },
        service: ServiceConfig { key: None, portal_id: None },
        user: UserConfig::default(),
        cache: CacheConfig::default(),
        admin_users: Vec::new(),
    }
}

async fn build_test_app() -> Arc<App> {
    App::build(test_config()).await.expect("app should build without a configured upstream")
}

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

/// Extract every `Set-Cookie` header value from a response (axum allows
/// several, one per `Cookie` added to the jar).
fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(axum::http::header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn cookie_header(cookies: &[String]) -> String {
    cookies
        .iter()
        .map(|c| c.split(';').next().unwrap())
        .collect::<Vec<_>>()
        .join("; ")
}

#[tokio::test]
async fn full_oauth_dev_login_flow_via_http() {
    let app = build_test_app().await;
    let router = app.router();

    // 1. Discovery documents are reachable and well-formed.
    let response = router
        .clone()
        .oneshot(Request::get("/.well-known/oauth-authorization-server").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // 2. Dynamic client registration.
    let response = router
        .clone()
        .oneshot(
            Request::post("/register")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    json!({
                        "client_name": "Integration Test Client",
                        "redirect_uris": ["https://client.example.com/cb"]
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let client_info: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let client_id = client_info["client_id"].as_str().unwrap().to_string();

    // 3. PKCE (RFC 7636 Appendix B canonical vector).
    let code_verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let code_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));

    // 4. Authorize: no vire_session cookie yet, so this parks a session and
    //    redirects to the login page, handing back mcp_session_id.
    let authorize_uri = format!(
        "/authorize?client_id={}&redirect_uri={}&response_type=code&state=xyz123&code_challenge={}&code_challenge_method=S256&scope=mcp",
        client_id,
        url_encode("https://client.example.com/cb"),
        code_challenge,
    );
    let response =
        router.clone().oneshot(Request::get(&authorize_uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers().get("Location").unwrap(), "/login");
    let session_cookies = set_cookies(&response);
    assert!(session_cookies.iter().any(|c| c.starts_with("mcp_session_id=")));
    let session_cookie_header = cookie_header(&session_cookies);

    // 5. Complete the bridge via the zero-network dev identity.
    let response = router
        .clone()
        .oneshot(
            Request::get("/login/dev")
                .header("Cookie", &session_cookie_header)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers().get("Location").unwrap().to_str().unwrap().to_string();
    assert!(location.starts_with("https://client.example.com/cb"));
    assert!(location.contains("state=xyz123"));

    let url = url::Url::parse(&location).unwrap();
    let pairs: std::collections::HashMap<_, _> = url.query_pairs().collect();
    let auth_code = pairs.get("code").unwrap().to_string();

    // 6. Exchange the authorization code for a token pair.
    let params = [
        ("grant_type", "authorization_code"),
        ("code", &auth_code),
        ("redirect_uri", "https://client.example.com/cb"),
        ("code_verifier", code_verifier),
        ("client_id", &client_id),
    ];
    let body_str = serde_urlencoded::to_string(params).unwrap();
    let response = router
        .clone()
        .oneshot(
            Request::post("/token")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(body_str))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let token_info: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let access_token = token_info["access_token"].as_str().unwrap().to_string();
    let refresh_token = token_info["refresh_token"].as_str().unwrap().to_string();

    // 7. The same code cannot be exchanged twice.
    let params = [
        ("grant_type", "authorization_code"),
        ("code", &auth_code),
        ("redirect_uri", "https://client.example.com/cb"),
        ("code_verifier", code_verifier),
        ("client_id", &client_id),
    ];
    let body_str = serde_urlencoded::to_string(params).unwrap();
    let response = router
        .clone()
        .oneshot(
            Request::post("/token")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(body_str))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // 8. Use the access token against the MCP endpoint.
    let response = router
        .clone()
        .oneshot(
            Request::post("/mcp")
                .header("Authorization", format!("Bearer {access_token}"))
                .header("Content-Type", "application/json")
                .body(Body::from(json!({"jsonrpc":"2.0","method":"tools/list","id":1}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let result: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(result.get("result").is_some());

    // 9. An unauthenticated call gets the RFC 9728 discovery challenge.
    let response = router
        .clone()
        .oneshot(
            Request::post("/mcp")
                .header("Content-Type", "application/json")
                .body(Body::from(json!({"jsonrpc":"2.0","method":"tools/list","id":1}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers().get(axum::http::header::WWW_AUTHENTICATE).unwrap().to_str().unwrap();
    assert!(challenge.contains("oauth-protected-resource"));

    // 10. Refresh rotates the token: the new access token differs and the old
    //     refresh token cannot be replayed.
    let params = [("grant_type", "refresh_token"), ("refresh_token", &refresh_token)];
    let body_str = serde_urlencoded::to_string(params).unwrap();
    let response = router
        .clone()
        .oneshot(
            Request::post("/token")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(body_str))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let new_token_info: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_ne!(new_token_info["access_token"].as_str().unwrap(), access_token);

    let params = [("grant_type", "refresh_token"), ("refresh_token", &refresh_token)];
    let body_str = serde_urlencoded::to_string(params).unwrap();
    let response = router
        .clone()
        .oneshot(
            Request::post("/token")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(body_str))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn authorize_rejects_unregistered_client_without_lenient_registration() {
    let app = build_test_app().await;
    let router = app.router();

    let response = router
        .oneshot(
            Request::get(
                "/authorize?client_id=unknown&redirect_uri=https://cb.com&response_type=code&code_challenge=abc&code_challenge_method=S256",
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn authorize_rejects_redirect_uri_not_registered_for_client() {
    let app = build_test_app().await;
    let router = app.router();

    let response = router
        .clone()
        .oneshot(
            Request::post("/register")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    json!({ "client_name": "Test", "redirect_uris": ["https://legit.example/cb"] }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let client_id =
        serde_json::from_slice::<serde_json::Value>(&body).unwrap()["client_id"].as_str().unwrap().to_string();

    let uri = format!(
        "/authorize?client_id={}&redirect_uri={}&response_type=code&code_challenge=abc&code_challenge_method=S256",
        client_id,
        url_encode("https://evil.example/steal"),
    );
    let response = router.oneshot(Request::get(&uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn token_exchange_rejects_pkce_verifier_mismatch() {
    let app = build_test_app().await;
    let router = app.router();

    let response = router
        .clone()
        .oneshot(
            Request::post("/register")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    json!({ "client_name": "Test", "redirect_uris": ["https://client.example/cb"] }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let client_id =
        serde_json::from_slice::<serde_json::Value>(&body).unwrap()["client_id"].as_str().unwrap().to_string();

    let real_verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let code_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(real_verifier.as_bytes()));

    let authorize_uri = format!(
        "/authorize?client_id={}&redirect_uri={}&response_type=code&code_challenge={}&code_challenge_method=S256",
        client_id,
        url_encode("https://client.example/cb"),
        code_challenge,
    );
    let response = router.clone().oneshot(Request::get(&authorize_uri).body(Body::empty()).unwrap()).await.unwrap();
    let session_cookie_header = cookie_header(&set_cookies(&response));

    let response = router
        .clone()
        .oneshot(
            Request::get("/login/dev").header("Cookie", &session_cookie_header).body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
    let location = response.headers().get("Location").unwrap().to_str().unwrap().to_string();
    let url = url::Url::parse(&location).unwrap();
    let auth_code = url.query_pairs().find(|(k, _)| k == "code").unwrap().1.to_string();

    let params = [
        ("grant_type", "authorization_code"),
        ("code", &auth_code),
        ("redirect_uri", "https://client.example/cb"),
        ("code_verifier", "totally-wrong-verifier-value-xyz"),
        ("client_id", &client_id),
    ];
    let body_str = serde_urlencoded::to_string(params).unwrap();
    let response = router
        .oneshot(
            Request::post("/token")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(body_str))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Discovery metadata is derived from the configured `portal_url`, never the
/// socket the server happens to be bound to — two apps configured with the
/// same `portal_url` but different listen addresses must publish identical
/// issuer/endpoint URLs.
#[tokio::test]
async fn discovery_metadata_is_stable_across_different_bind_hosts() {
    let mut config_a = test_config();
    config_a.server.host = "127.0.0.1".into();
    config_a.server.port = 8081;
    let mut config_b = test_config();
    config_b.server.host = "0.0.0.0".into();
    config_b.server.port = 9090;

    let app_a = App::build(config_a).await.unwrap();
    let app_b = App::build(config_b).await.unwrap();

    let fetch_metadata = |router: axum::Router| async {
        let response = router
            .oneshot(Request::get("/.well-known/oauth-authorization-server").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice::<serde_json::Value>(&body).unwrap()
    };

    let metadata_a = fetch_metadata(app_a.router()).await;
    let metadata_b = fetch_metadata(app_b.router()).await;

    for field in ["issuer", "authorization_endpoint", "token_endpoint", "registration_endpoint"] {
        assert_eq!(metadata_a[field], metadata_b[field], "{field} must not depend on the bind address");
    }
}
