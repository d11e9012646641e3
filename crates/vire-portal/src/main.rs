//! Vire Portal - Entry Point
//!
//! Boots the OAuth 2.1 authorization server, session bridge, and MCP proxy
//! as a single HTTP service.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vire_portal::app::App;
use vire_portal::config::{ApiConfig, AuthConfig, CacheConfig, Config, OAuthProviderConfig, ServerConfig, ServiceConfig, UserConfig};

#[derive(Parser, Debug)]
#[command(name = "vire-portal")]
#[command(about = "OAuth 2.1 / MCP authorization portal fronting the Vire backend API")]
#[command(version)]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// HTTP server port.
    #[arg(long, default_value = "8000", env = "PORT")]
    port: u16,

    /// Public issuer base URL advertised in discovery documents and JWT claims.
    /// Falls back to `http://{host}:{port}` (or `localhost` for `0.0.0.0`) when unset.
    #[arg(long, env = "PORTAL_URL")]
    portal_url: Option<String>,

    /// HMAC-SHA256 secret used to sign and validate portal JWTs. Empty disables
    /// validation entirely - never set this empty in production.
    #[arg(long, env = "JWT_SECRET", default_value = "")]
    jwt_secret: String,

    /// Auto-register unknown client_ids seen at /authorize (Claude Desktop compatibility).
    #[arg(long, env = "LENIENT_CLIENT_REGISTRATION")]
    lenient_client_registration: bool,

    /// Enable the zero-network GET /login/dev bridge. Never enable in production.
    #[arg(long, env = "DEV_LOGIN")]
    dev_login: bool,

    /// Google OAuth2 app client ID, enabling "Continue with Google" at /login.
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    google_client_id: Option<String>,
    /// Google OAuth2 app client secret.
    #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
    google_client_secret: Option<String>,

    /// GitHub OAuth2 app client ID, enabling "Continue with GitHub" at /login.
    #[arg(long, env = "GITHUB_CLIENT_ID")]
    github_client_id: Option<String>,
    /// GitHub OAuth2 app client secret.
    #[arg(long, env = "GITHUB_CLIENT_SECRET")]
    github_client_secret: Option<String>,

    /// Base URL of the upstream backend REST service.
    #[arg(long, env = "UPSTREAM_API_URL", default_value = "")]
    upstream_api_url: String,

    /// Shared secret this portal presents to upstream's service-identity handshake.
    #[arg(long, env = "SERVICE_KEY")]
    service_key: Option<String>,
    /// This portal instance's service id, sent alongside `service_key`.
    #[arg(long, env = "SERVICE_PORTAL_ID")]
    service_portal_id: Option<String>,

    /// Default portfolio injected into proxied tool calls that accept one.
    #[arg(long, env = "DEFAULT_PORTFOLIO")]
    default_portfolio: Option<String>,
    /// Default display currency injected into proxied tool calls that accept one.
    #[arg(long, env = "DISPLAY_CURRENCY")]
    display_currency: Option<String>,

    /// Comma-separated emails promoted to the admin role at startup (additive only).
    #[arg(long, env = "ADMIN_USERS", value_delimiter = ',')]
    admin_users: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

fn oauth_provider_config(client_id: Option<String>, client_secret: Option<String>) -> Option<OAuthProviderConfig> {
    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) if !client_id.is_empty() && !client_secret.is_empty() => {
            Some(OAuthProviderConfig { client_id, client_secret })
        }
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), host = %cli.host, port = cli.port, "starting vire-portal");

    let config = Config {
        server: ServerConfig { host: cli.host, port: cli.port },
        auth: AuthConfig {
            jwt_secret: cli.jwt_secret,
            portal_url: cli.portal_url,
            lenient_client_registration: cli.lenient_client_registration,
            dev_login: cli.dev_login,
            google: oauth_provider_config(cli.google_client_id, cli.google_client_secret),
            github: oauth_provider_config(cli.github_client_id, cli.github_client_secret),
        },
        api: ApiConfig { url: cli.upstream_api_url },
        service: ServiceConfig { key: cli.service_key, portal_id: cli.service_portal_id },
        user: UserConfig { default_portfolio: cli.default_portfolio, display_currency: cli.display_currency },
        cache: CacheConfig::default(),
        admin_users: cli.admin_users,
    };

    let app = App::build(config).await?;
    app.serve().await
}
