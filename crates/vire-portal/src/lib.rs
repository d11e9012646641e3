//! Vire Portal
//!
//! A stateless web portal that fronts an opaque backend REST service
//! ("upstream") and exposes a Model Context Protocol (MCP) endpoint to agent
//! clients. The portal is an OAuth 2.1 authorization server (PKCE, dynamic
//! client registration, discovery) bridging a one-time browser login to a
//! long-lived per-agent JSON Web Token, and a dynamic tool-catalog/proxy
//! engine that turns MCP tool calls into authenticated HTTP calls against
//! upstream.
//!
//! # Example
//!
//! ```no_run
//! use vire_portal::app::App;
//! use vire_portal::config::{ApiConfig, AuthConfig, CacheConfig, Config, ServerConfig, ServiceConfig, UserConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config {
//!     server: ServerConfig { host: "0.0.0.0".into(), port: 8000 },
//!     auth: AuthConfig {
//!         jwt_secret: std::env::var("JWT_SECRET").unwrap_or_default(),
//!         portal_url: None,
//!         lenient_client_registration: false,
//!         dev_login: false,
//!         google: None,
//!         github: None,
//!     },
//!     api: ApiConfig { url: std::env::var("UPSTREAM_API_URL").unwrap_or_default() },
//!     service: ServiceConfig { key: None, portal_id: None },
//!     user: UserConfig::default(),
//!     cache: CacheConfig::default(),
//!     admin_users: Vec::new(),
//! };
//! let app = App::build(config).await?;
//! app.serve().await
//! # }
//! ```

pub mod admin;
pub mod api_proxy;
pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod mcp;
pub mod oauth;
pub mod tools;
pub mod upstream;

pub use app::App;
pub use config::Config;
pub use error::{CatalogError, OAuthError, UpstreamError};
