//! Tool-catalog fetch, validation, and MCP tool synthesis.
//!
//! At startup the portal fetches `GET /api/mcp/tools` from upstream, validates
//! every descriptor, and synthesizes one generic [`ProxyTool`] per surviving
//! entry: the catalog *is* the tool registry, rather than the registry being
//! a fixed set of hand-written structs at compile time.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::config::limits;
use crate::error::{CatalogError, CatalogResult};
use crate::tools::{McpTool, ToolContext, ToolResult};
use crate::upstream::UpstreamClient;

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Where a tool parameter is placed in the proxied HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Body,
}

/// A single parameter of a [`ToolDescriptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub location: ParamLocation,
    /// JSON Schema primitive type (`"string"`, `"integer"`, `"boolean"`, ...).
    #[serde(default = "default_param_type")]
    pub r#type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub r#enum: Option<Vec<String>>,
    /// Resolution source when the argument is absent at call time: e.g.
    /// `"default_portfolio"` resolves against static config,
    /// `"default_from_upstream"` against a fallback upstream lookup.
    #[serde(default)]
    pub default_from: Option<String>,
}

fn default_param_type() -> String {
    "string".to_string()
}

/// A catalog entry describing one proxied upstream endpoint, immutable once
/// validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Vec<ToolParam>,
}

impl ToolDescriptor {
    fn is_valid(&self) -> bool {
        if self.name.is_empty() || self.method.is_empty() || self.path.is_empty() {
            return false;
        }
        if !ALLOWED_METHODS.contains(&self.method.to_uppercase().as_str()) {
            return false;
        }
        if !self.path.starts_with("/api/") {
            return false;
        }
        if self.path.split('/').any(|segment| segment == "..") {
            return false;
        }
        true
    }
}

/// Fetch the tool catalog from upstream, retrying up to
/// `limits::CATALOG_FETCH_ATTEMPTS` times with `limits::CATALOG_FETCH_BACKOFF`
/// between attempts. Never fails the caller: an unreachable catalog after all
/// retries logs a warning and yields an empty tool set.
pub async fn fetch_and_build(upstream: &UpstreamClient) -> Vec<Box<dyn McpTool>> {
    let raw = fetch_with_retry(upstream).await.unwrap_or_default();
    let validated = validate(raw);
    build_tools(validated)
}

async fn fetch_with_retry(upstream: &UpstreamClient) -> Option<Vec<ToolDescriptor>> {
    if !upstream.is_configured() {
        tracing::warn!("no upstream configured; starting with zero tools");
        return None;
    }
    for attempt in 1..=limits::CATALOG_FETCH_ATTEMPTS {
        match fetch_once(upstream).await {
            Ok(descriptors) => return Some(descriptors),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "tool catalog fetch failed");
                if attempt < limits::CATALOG_FETCH_ATTEMPTS {
                    tokio::time::sleep(limits::CATALOG_FETCH_BACKOFF).await;
                }
            }
        }
    }
    tracing::warn!(
        attempts = limits::CATALOG_FETCH_ATTEMPTS,
        "tool catalog unreachable after all retries; server starts with zero tools"
    );
    None
}

async fn fetch_once(upstream: &UpstreamClient) -> CatalogResult<Vec<ToolDescriptor>> {
    let resp = upstream
        .proxy_request(
            Method::GET,
            "/api/mcp/tools",
            None,
            &[],
            limits::UPSTREAM_TIMEOUT,
            limits::CATALOG_BODY_CAP,
        )
        .await
        .map_err(CatalogError::FetchFailed)?;

    if !resp.is_success() {
        return Err(CatalogError::ToolCallFailed {
            path: "/api/mcp/tools".to_string(),
            status: resp.status,
            body: resp.body_excerpt(512),
        });
    }

    serde_json::from_slice(&resp.body).map_err(|e| CatalogError::FetchFailed(e.into()))
}

/// Drop invalid entries and collapse duplicate names, logging a warning for
/// each rejection.
fn validate(raw: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for descriptor in raw {
        if !descriptor.is_valid() {
            tracing::warn!(name = %descriptor.name, "skipping invalid tool descriptor");
            continue;
        }
        if !seen.insert(descriptor.name.clone()) {
            tracing::warn!(name = %descriptor.name, "skipping duplicate tool name");
            continue;
        }
        out.push(descriptor);
    }
    out
}

fn build_tools(descriptors: Vec<ToolDescriptor>) -> Vec<Box<dyn McpTool>> {
    descriptors.into_iter().map(|d| Box::new(ProxyTool { descriptor: d }) as Box<dyn McpTool>).collect()
}

/// A single generic tool synthesized from one [`ToolDescriptor`]. One struct
/// handles every catalog entry by closing over its descriptor.
pub struct ProxyTool {
    descriptor: ToolDescriptor,
}

#[async_trait::async_trait]
impl McpTool for ProxyTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        self.descriptor.description.as_deref().unwrap_or("")
    }

    fn input_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.descriptor.params {
            let mut schema = serde_json::Map::new();
            schema.insert("type".to_string(), serde_json::Value::String(param.r#type.clone()));
            if let Some(ref desc) = param.description {
                schema.insert("description".to_string(), serde_json::Value::String(desc.clone()));
            }
            if let Some(ref values) = param.r#enum {
                schema.insert(
                    "enum".to_string(),
                    serde_json::Value::Array(values.iter().cloned().map(serde_json::Value::String).collect()),
                );
            }
            properties.insert(param.name.clone(), serde_json::Value::Object(schema));
            if param.required && param.default_from.is_none() {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let mut path = self.descriptor.path.clone();
        let mut query_pairs: Vec<(String, String)> = Vec::new();
        let mut body_fields = serde_json::Map::new();

        for param in &self.descriptor.params {
            let value = resolve_arg(&input, param, ctx).await;

            match param.location {
                ParamLocation::Path => {
                    let Some(value) = value else {
                        return Err(CatalogError::MissingParam(param.name.clone()));
                    };
                    path = path.replace(&format!("{{{}}}", param.name), &value_to_plain_string(&value));
                }
                ParamLocation::Query => {
                    if let Some(value) = value {
                        query_pairs.push((param.name.clone(), value_to_plain_string(&value)));
                    } else if param.required {
                        return Err(CatalogError::MissingParam(param.name.clone()));
                    }
                }
                ParamLocation::Body => {
                    if let Some(value) = value {
                        body_fields.insert(param.name.clone(), value);
                    } else if param.required {
                        return Err(CatalogError::MissingParam(param.name.clone()));
                    }
                }
            }
        }

        if !query_pairs.is_empty() {
            let query = serde_urlencoded::to_string(&query_pairs).unwrap_or_default();
            path.push(if path.contains('?') { '&' } else { '?' });
            path.push_str(&query);
        }

        let body = (!body_fields.is_empty()).then(|| serde_json::Value::Object(body_fields));

        let method = Method::from_bytes(self.descriptor.method.to_uppercase().as_bytes())
            .expect("validated against an explicit method whitelist");

        let headers = build_headers(ctx);
        let resp = ctx
            .upstream
            .proxy_request(method, &path, body, &headers, limits::TOOL_CALL_TIMEOUT, limits::TOOL_RESPONSE_CAP)
            .await
            .map_err(CatalogError::FetchFailed)?;

        if !resp.is_success() {
            return Err(CatalogError::ToolCallFailed {
                path: self.descriptor.path.clone(),
                status: resp.status,
                body: resp.body_excerpt(2048),
            });
        }

        Ok(String::from_utf8_lossy(&resp.body).into_owned())
    }
}

/// Resolve one argument through a three-tier fallback: (a) explicit argument,
/// (b) static config header, (c) upstream default lookup.
async fn resolve_arg(input: &serde_json::Value, param: &ToolParam, ctx: &ToolContext) -> Option<serde_json::Value> {
    if let Some(value) = input.get(&param.name) {
        if !value.is_null() {
            return Some(value.clone());
        }
    }

    match param.default_from.as_deref() {
        Some("default_portfolio") => ctx
            .static_headers
            .default_portfolio
            .clone()
            .map(serde_json::Value::String),
        Some("display_currency") => ctx
            .static_headers
            .display_currency
            .clone()
            .map(serde_json::Value::String),
        Some("upstream_default_portfolio") => {
            match ctx.upstream.get_json::<serde_json::Value>("/api/portfolios/default").await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(error = %e, "default_from upstream fallback failed");
                    None
                }
            }
        }
        _ => None,
    }
}

fn value_to_plain_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the fixed header set injected into every proxied call: user
/// identity, static portfolio/currency config (CRLF-sanitized), and
/// compile-time portal identity.
fn build_headers(ctx: &ToolContext) -> Vec<(&'static str, String)> {
    let mut headers = vec![("X-Vire-User-ID", crate::upstream::sanitize_header_value(&ctx.user_id))];
    if let Some(ref portfolio) = ctx.static_headers.default_portfolio {
        headers.push(("X-Vire-Portfolios", crate::upstream::sanitize_header_value(portfolio)));
    }
    if let Some(ref currency) = ctx.static_headers.display_currency {
        headers.push(("X-Vire-Display-Currency", crate::upstream::sanitize_header_value(currency)));
    }
    headers.push(("X-Vire-Portal-Version", ctx.static_headers.portal_version.to_string()));
    headers.push(("X-Vire-Portal-Build", ctx.static_headers.portal_build.to_string()));
    headers.push(("X-Vire-Portal-Commit", ctx.static_headers.portal_commit.to_string()));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, method: &str, path: &str) -> ToolDescriptor {
        ToolDescriptor { name: name.into(), method: method.into(), path: path.into(), description: None, params: vec![] }
    }

    #[test]
    fn rejects_empty_fields() {
        let d = descriptor("", "GET", "/api/x");
        assert!(!d.is_valid());
    }

    #[test]
    fn rejects_non_whitelisted_method() {
        let d = descriptor("t", "TRACE", "/api/x");
        assert!(!d.is_valid());
    }

    #[test]
    fn rejects_path_outside_api_prefix() {
        let d = descriptor("t", "GET", "/other/x");
        assert!(!d.is_valid());
    }

    #[test]
    fn rejects_dot_dot_segment() {
        let d = descriptor("t", "GET", "/api/../secret");
        assert!(!d.is_valid());
    }

    #[test]
    fn accepts_well_formed_descriptor() {
        let d = descriptor("list_portfolios", "GET", "/api/portfolios");
        assert!(d.is_valid());
    }

    #[test]
    fn validate_drops_invalid_and_duplicate_names() {
        let raw = vec![
            descriptor("list_portfolios", "GET", "/api/portfolios"),
            descriptor("list_portfolios", "GET", "/api/portfolios/dup"),
            descriptor("bad", "TRACE", "/api/bad"),
        ];
        let validated = validate(raw);
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].name, "list_portfolios");
    }

    #[test]
    fn input_schema_marks_required_without_default() {
        let tool = ProxyTool {
            descriptor: ToolDescriptor {
                name: "t".into(),
                method: "GET".into(),
                path: "/api/t".into(),
                description: Some("desc".into()),
                params: vec![
                    ToolParam {
                        name: "id".into(),
                        location: ParamLocation::Path,
                        r#type: "string".into(),
                        required: true,
                        description: None,
                        r#enum: None,
                        default_from: None,
                    },
                    ToolParam {
                        name: "portfolio".into(),
                        location: ParamLocation::Query,
                        r#type: "string".into(),
                        required: true,
                        description: None,
                        r#enum: None,
                        default_from: Some("default_portfolio".into()),
                    },
                ],
            },
        };
        let schema = tool.input_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::Value::String("id".into())));
        assert!(!required.contains(&serde_json::Value::String("portfolio".into())));
    }
}
