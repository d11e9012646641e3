//! Configuration for the Vire portal.
//!
//! Everything a running portal needs is captured here, populated once at startup
//! from CLI flags / environment variables and never mutated afterwards (see
//! `App`, which owns a `Config` for the lifetime of the process).

use std::time::Duration;

/// Constants governing timeouts, retries, and bounds that are not configurable.
pub mod limits {
    use std::time::Duration;

    /// Upstream persistence calls (store L2 reads/writes) never block longer than this.
    pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

    /// Tool proxy calls against upstream may run up to this long.
    pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(300);

    /// Catalog fetch retry attempts.
    pub const CATALOG_FETCH_ATTEMPTS: u32 = 3;

    /// Delay between catalog fetch retries.
    pub const CATALOG_FETCH_BACKOFF: Duration = Duration::from_secs(2);

    /// Catalog response body cap.
    pub const CATALOG_BODY_CAP: usize = 1024 * 1024;

    /// Tool proxy upstream response body cap.
    pub const TOOL_RESPONSE_CAP: usize = 50 * 1024 * 1024;

    /// Global request body cap for ordinary routes.
    pub const GLOBAL_BODY_CAP: usize = 1024 * 1024;

    /// Relaxed body cap for the streaming `/mcp` endpoint.
    pub const MCP_BODY_CAP: usize = 10 * 1024 * 1024;

    /// Response cache entry body cap; larger bodies bypass caching.
    pub const CACHE_BODY_CAP: usize = 5 * 1024 * 1024;

    /// Auth session TTL (time between `/authorize` and login completion).
    pub const AUTH_SESSION_TTL: Duration = Duration::from_secs(600);

    /// Authorization code TTL (single use, very short-lived).
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(60);

    /// Access token (JWT) TTL.
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);

    /// Refresh token TTL.
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

    /// Discovery document cache lifetime advertised to clients.
    pub const DISCOVERY_CACHE_SECONDS: u64 = 3600;
}

/// Server listen configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Authentication/session configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC-SHA256 signing/validation key. Empty disables validation (legacy/dev only).
    pub jwt_secret: String,
    /// Public issuer base URL; falls back to `server.host:port` when unset.
    pub portal_url: Option<String>,
    /// Auto-register unknown `client_id`s seen at `/authorize` (Claude Desktop compatibility).
    pub lenient_client_registration: bool,
    /// Enables the zero-network `GET /login/dev` bridge. Never set in production.
    pub dev_login: bool,
    /// OAuth2 app credentials for the Google login provider, if configured.
    pub google: Option<OAuthProviderConfig>,
    /// OAuth2 app credentials for the GitHub login provider, if configured.
    pub github: Option<OAuthProviderConfig>,
}

/// Third-party identity provider app registration.
#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// Upstream backend configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub url: String,
}

/// Service-identity handshake configuration (portal <-> upstream).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub key: Option<String>,
    pub portal_id: Option<String>,
}

/// Static per-request headers injected into every tool-proxy call.
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    pub default_portfolio: Option<String>,
    pub display_currency: Option<String>,
}

/// Response cache tuning.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(30), max_entries: 1000 }
    }
}

/// Top-level portal configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub api: ApiConfig,
    pub service: ServiceConfig,
    pub user: UserConfig,
    pub cache: CacheConfig,
    /// Emails promoted to `admin` at startup. Additive, never demoting.
    pub admin_users: Vec<String>,
}

impl Config {
    /// Resolve the public issuer base URL: explicit `portal_url` wins,
    /// otherwise derive from `host:port`, normalizing `0.0.0.0` to `localhost`.
    #[must_use]
    pub fn issuer_url(&self) -> String {
        if let Some(ref url) = self.auth.portal_url {
            return url.trim().trim_end_matches('/').to_string();
        }
        let host = if self.server.host == "0.0.0.0" { "localhost" } else { &self.server.host };
        format!("http://{host}:{}", self.server.port)
    }

    /// Whether JWT validation is enabled. Disabled only when `jwt_secret` is empty,
    /// an explicit legacy/dev escape hatch forbidden in production.
    #[must_use]
    pub fn jwt_validation_enabled(&self) -> bool {
        !self.auth.jwt_secret.is_empty()
    }

    /// Log startup warnings for configuration choices that are unsafe in production.
    pub fn warn_on_unsafe_settings(&self) {
        if !self.jwt_validation_enabled() {
            tracing::warn!(
                "auth.jwt_secret is empty: JWT signature/expiry validation is DISABLED. \
                 This must never be used in a production configuration."
            );
        }
        if self.auth.dev_login {
            tracing::warn!(
                "auth.dev_login is enabled: the /login/dev bridge bypasses upstream identity \
                 verification entirely. This must never be used in a production configuration."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig { host: "0.0.0.0".into(), port: 8000 },
            auth: AuthConfig {
                jwt_secret: String::new(),
                portal_url: None,
                lenient_client_registration: true,
                dev_login: false,
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

    #[test]
    fn issuer_url_normalizes_0_0_0_0_to_localhost() {
        let config = base_config();
        assert_eq!(config.issuer_url(), "http://localhost:8000");
    }

    #[test]
    fn issuer_url_prefers_explicit_portal_url() {
        let mut config = base_config();
        config.auth.portal_url = Some("https://portal.example/ ".into());
        assert_eq!(config.issuer_url(), "https://portal.example");
    }

    #[test]
    fn jwt_validation_disabled_when_secret_empty() {
        let config = base_config();
        assert!(!config.jwt_validation_enabled());
    }

    #[test]
    fn jwt_validation_enabled_when_secret_set() {
        let mut config = base_config();
        config.auth.jwt_secret = "s3cr3t".into();
        assert!(config.jwt_validation_enabled());
    }
}
