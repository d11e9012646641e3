//! Application assembly and router wiring.
//!
//! `App` is the one piece of shared state handed to every handler —
//! everything in it is either immutable after [`App::build`] or internally
//! synchronized, so no handler ever needs a lock broader than the one owned
//! by the field it touches. Per-request identity travels in a request-scoped
//! context, never in shared mutable globals.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use oauth2::basic::BasicClient;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::ResponseCache;
use crate::config::{limits, Config};
use crate::mcp::session::SessionManager;
use crate::mcp::transport;
use crate::oauth::login::{build_github_client, build_google_client, PendingProviderLogins};
use crate::oauth::jwt::JwtCodec;
use crate::oauth::store::OAuthStore;
use crate::tools::{McpTool, StaticHeaders};
use crate::upstream::UpstreamClient;

/// Everything a running portal needs, built once at startup.
pub struct App {
    pub config: Config,
    pub upstream: UpstreamClient,
    pub oauth_store: OAuthStore,
    pub jwt: JwtCodec,
    pub cache: ResponseCache,
    pub tools: Vec<Box<dyn McpTool>>,
    pub sessions: Arc<SessionManager>,
    pub static_headers: Arc<StaticHeaders>,
    pub google_client: Option<BasicClient>,
    pub github_client: Option<BasicClient>,
    pub pending_provider_logins: PendingProviderLogins,
}

impl App {
    /// Assemble the portal: connect to upstream, register this instance's
    /// service identity, fetch the tool catalog, promote configured admins,
    /// and build every long-lived collaborator. Never fails on a degraded
    /// upstream — only on configuration that cannot produce a running
    /// server at all; upstream persistence itself stays best-effort.
    pub async fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        config.warn_on_unsafe_settings();

        let upstream = UpstreamClient::new(config.api.url.clone(), config.service.key.clone(), config.service.portal_id.clone());

        if let Err(e) = upstream.register_service().await {
            tracing::warn!(error = %e, "service identity handshake with upstream failed");
        }

        let tools = crate::catalog::fetch_and_build(&upstream).await;
        tracing::info!(count = tools.len(), "tool catalog ready");

        crate::admin::promote_admins(&upstream, &config.admin_users).await;

        let oauth_store = OAuthStore::new(upstream.clone());
        let jwt = JwtCodec::new(config.auth.jwt_secret.clone(), config.issuer_url());
        let cache = ResponseCache::new(config.cache.ttl, config.cache.max_entries, limits::CACHE_BODY_CAP);
        let sessions = Arc::new(SessionManager::new());
        let static_headers = Arc::new(StaticHeaders::from_user_config(&config.user));

        let redirect_base = config.issuer_url();
        let google_client = config
            .auth
            .google
            .as_ref()
            .map(|c| build_google_client(&c.client_id, &c.client_secret, &redirect_base));
        let github_client = config
            .auth
            .github
            .as_ref()
            .map(|c| build_github_client(&c.client_id, &c.client_secret, &redirect_base));

        let app = Arc::new(Self {
            config,
            upstream,
            oauth_store,
            jwt,
            cache,
            tools,
            sessions,
            static_headers,
            google_client,
            github_client,
            pending_provider_logins: PendingProviderLogins::default(),
        });

        Arc::new(app.oauth_store.clone()).start_cleanup_task();
        Arc::clone(&app.sessions).start_cleanup_task();

        Ok(app)
    }

    /// Build the full router: OAuth authorization server, session bridge,
    /// browser proxy, and the MCP endpoint, all sharing this `App` as state.
    #[must_use]
    pub fn router(self: &Arc<Self>) -> Router {
        use crate::oauth::{authorize, discovery, login, register, token};

        // The streaming `/mcp` endpoint gets a relaxed body cap (>=10 MB) vs the
        // global cap (>=1 MB) every other route keeps. Two sub-routers, merged,
        // so each keeps its own `DefaultBodyLimit` layer rather than one cap
        // applying to everything.
        let mcp_router = Router::new()
            .route("/mcp", get(transport::handle_mcp_get).post(transport::handle_mcp_post))
            .layer(DefaultBodyLimit::max(limits::MCP_BODY_CAP));

        let rest_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/.well-known/oauth-authorization-server", get(discovery::authorization_server_metadata))
            .route("/.well-known/oauth-protected-resource", get(discovery::protected_resource_metadata))
            .route("/register", post(register::register))
            .route("/authorize", get(authorize::authorize))
            .route("/login", get(login::login_page))
            .route("/login/password", post(login::login_password))
            .route("/login/dev", get(login::login_dev))
            .route("/login/{provider}", get(login::login_provider_redirect))
            .route("/auth/{provider}/callback", get(login::provider_callback))
            .route("/token", post(token::token))
            .route("/api/{*rest}", axum::routing::any(crate::api_proxy::proxy))
            .layer(DefaultBodyLimit::max(limits::GLOBAL_BODY_CAP));

        mcp_router
            .merge(rest_router)
            .layer(
                CorsLayer::new()
                    .allow_origin(tower_http::cors::Any)
                    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
                    .allow_headers(tower_http::cors::Any),
            )
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::new())
            .with_state(Arc::clone(self))
    }

    /// Bind and serve until a shutdown signal arrives.
    pub async fn serve(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "vire-portal listening");

        let router = self.router();
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
        Ok(())
    }
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok", "service": "vire-portal", "version": env!("CARGO_PKG_VERSION") }))
}

async fn readiness_check(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ready",
        "tools": app.tools.len(),
        "sessions": app.sessions.session_count().await,
        "upstream_configured": app.upstream.is_configured(),
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
