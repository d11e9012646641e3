//! MCP tool trait and per-request execution context.
//!
//! A single [`crate::catalog::ProxyTool`] implements this trait generically,
//! closing over one `ToolDescriptor` fetched from upstream at startup,
//! rather than one hand-written struct per endpoint.

use std::sync::Arc;

use crate::config::UserConfig;
use crate::error::CatalogError;
use crate::upstream::UpstreamClient;

/// Static, process-lifetime identity injected into every proxied tool call.
#[derive(Debug, Clone)]
pub struct StaticHeaders {
    pub default_portfolio: Option<String>,
    pub display_currency: Option<String>,
    pub portal_version: &'static str,
    pub portal_build: &'static str,
    pub portal_commit: &'static str,
}

impl StaticHeaders {
    #[must_use]
    pub fn from_user_config(user: &UserConfig) -> Self {
        Self {
            default_portfolio: user.default_portfolio.clone(),
            display_currency: user.display_currency.clone(),
            portal_version: env!("CARGO_PKG_VERSION"),
            // Set by build scripts in a real deployment; compiled-in placeholders here
            // since this crate has no build.rs (see DESIGN.md).
            portal_build: option_env!("VIRE_PORTAL_BUILD").unwrap_or("dev"),
            portal_commit: option_env!("VIRE_PORTAL_COMMIT").unwrap_or("unknown"),
        }
    }
}

/// Per-request execution context. Travels in a request-scoped value, never in
/// shared mutable globals. Constructed fresh for every `/mcp` tool call once
/// the auth gate has resolved `user_id`.
#[derive(Clone)]
pub struct ToolContext {
    pub upstream: UpstreamClient,
    pub user_id: String,
    pub static_headers: Arc<StaticHeaders>,
}

/// Result alias for tool execution.
pub type ToolResult<T> = Result<T, CatalogError>;

/// Trait implemented by every MCP tool.
#[async_trait::async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name, unique within the catalog.
    fn name(&self) -> &str;

    /// Human-readable description surfaced to the calling LLM.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's input arguments.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool, returning the raw upstream JSON serialized to text —
    /// the MCP `content[].text` field is a string, so the upstream body is
    /// serialized, never reshaped.
    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String>;
}
