//! Streamable HTTP transport for `/mcp`.
//!
//! A single endpoint carries both directions: `POST` for JSON-RPC requests,
//! `GET` for the server-initiated SSE stream. Session resilience uses a
//! "mailbox" pattern (`session::Session`) — a ring buffer plus broadcast
//! channel lets a client reconnect with `Last-Event-ID` and replay whatever
//! it missed. There is only one MCP client shape here, so no legacy
//! two-endpoint transport or debug session-listing route.

use std::borrow::Cow;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;

use super::session::Session;
use crate::app::App;
use crate::oauth::authorize::BROWSER_COOKIE;
use crate::tools::{McpTool, ToolContext};

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 error (reserved for protocol-level failures — malformed
/// request, unknown method — never for a tool's own execution failure,
/// which is surfaced as an MCP tool result with `isError: true` instead).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(Self::VERSION), result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
            id,
        }
    }
}

/// MCP tool descriptor for `tools/list`.
#[derive(Debug, Serialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct McpQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Resolve the calling agent's identity: `Authorization: Bearer` first, then
/// the `vire_session` cookie (covers a browser-hosted MCP client sharing its
/// login), else a 401 carrying the RFC 9728 discovery challenge so a
/// compliant client knows where to start the OAuth dance.
fn authenticate(app: &App, headers: &HeaderMap, jar: &CookieJar) -> Result<String, Response> {
    if let Some(token) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if let Some(claims) = app.jwt.validate(token) {
            return Ok(claims.sub);
        }
    } else if let Some(cookie) = jar.get(BROWSER_COOKIE) {
        if let Some(claims) = app.jwt.validate(cookie.value()) {
            return Ok(claims.sub);
        }
    }

    let challenge = format!(
        r#"Bearer resource_metadata="{}/.well-known/oauth-protected-resource""#,
        app.config.issuer_url()
    );
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(axum::http::header::WWW_AUTHENTICATE, value);
    }
    Err(response)
}

fn session_header_value(session_id: &str) -> HeaderValue {
    HeaderValue::from_str(session_id).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}

/// `POST /mcp`
pub async fn handle_mcp_post(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<McpQuery>,
    Json(req): Json<JsonRpcRequest>,
) -> Response {
    let user_id = match authenticate(&app, &headers, &jar) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let session = app.sessions.get_or_create_session(query.session_id.as_deref()).await;
    let is_notification = req.id.is_none();

    let ctx = ToolContext { upstream: app.upstream.clone(), user_id, static_headers: app.static_headers.clone() };

    let response = match req.method.as_str() {
        "initialize" => {
            let result = handle_initialize(&req.params);
            let mut resp = Json(JsonRpcResponse::success(req.id, result)).into_response();
            resp.headers_mut().insert("Mcp-Session-Id", session_header_value(&session.id));
            return resp;
        }
        "notifications/initialized" | "initialized" | "notifications/cancelled" => {
            if is_notification {
                return StatusCode::ACCEPTED.into_response();
            }
            JsonRpcResponse::success(req.id, serde_json::json!({}))
        }
        "tools/list" => handle_tools_list(req.id, &app.tools),
        "tools/call" => {
            let tool_response = handle_tools_call(req.id.clone(), &req.params, &app.tools, &ctx).await;
            if let Some(ref result) = tool_response.result {
                let event_data =
                    serde_json::to_string(&JsonRpcResponse::success(req.id.clone(), result.clone())).unwrap_or_default();
                session.push_event("message", event_data).await;
            }
            tool_response
        }
        "ping" => JsonRpcResponse::success(req.id, serde_json::json!({})),
        _ => {
            if is_notification {
                return StatusCode::ACCEPTED.into_response();
            }
            JsonRpcResponse::error(req.id, -32601, format!("Method not found: {}", req.method))
        }
    };

    let mut resp = Json(response).into_response();
    resp.headers_mut().insert("Mcp-Session-Id", session_header_value(&session.id));
    resp
}

/// `GET /mcp` — server-initiated SSE stream, replaying missed events by
/// `Last-Event-ID` before switching to live broadcast delivery.
pub async fn handle_mcp_get(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<McpQuery>,
) -> Response {
    if let Err(resp) = authenticate(&app, &headers, &jar) {
        return resp;
    }

    let last_event_id: u64 =
        headers.get("Last-Event-ID").and_then(|v| v.to_str().ok()).and_then(|s| s.parse().ok()).unwrap_or(0);

    let session = app.sessions.get_or_create_session(query.session_id.as_deref()).await;
    tracing::info!(session_id = %session.id, last_event_id, "new MCP SSE stream");

    let stream = build_sse_stream(session, last_event_id).await;

    (
        [("X-Accel-Buffering", "no"), ("Cache-Control", "no-cache, no-store, must-revalidate")],
        Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping")),
    )
        .into_response()
}

async fn build_sse_stream(session: Arc<Session>, last_event_id: u64) -> impl Stream<Item = Result<Event, Infallible>> {
    let missed_events = session.get_events_after(last_event_id).await;
    let replay_stream = stream::iter(missed_events.into_iter().map(|e| Ok::<_, Infallible>(e.to_sse_event())));

    let receiver = session.subscribe();
    let live_stream =
        BroadcastStream::new(receiver).filter_map(|result| async move { result.ok().map(|e: super::session::BufferedEvent| Ok(e.to_sse_event())) });

    replay_stream.chain(live_stream)
}

fn handle_initialize(params: &serde_json::Value) -> serde_json::Value {
    let protocol_version = params.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or("2024-11-05");
    serde_json::json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": "vire-portal", "version": env!("CARGO_PKG_VERSION") }
    })
}

fn handle_tools_list(id: Option<serde_json::Value>, tools: &[Box<dyn McpTool>]) -> JsonRpcResponse {
    let tool_list: Vec<McpToolInfo> = tools
        .iter()
        .map(|t| McpToolInfo { name: t.name().to_string(), description: t.description().to_string(), input_schema: t.input_schema() })
        .collect();
    JsonRpcResponse::success(id, serde_json::json!({ "tools": tool_list }))
}

/// A tool's own failure is an MCP-level result (`isError: true`), not a
/// JSON-RPC protocol error — the catalog entry and its arguments were valid,
/// only the proxied call failed.
async fn handle_tools_call(
    id: Option<serde_json::Value>,
    params: &serde_json::Value,
    tools: &[Box<dyn McpTool>],
    ctx: &ToolContext,
) -> JsonRpcResponse {
    let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::error(id, -32602, "Missing 'name' parameter");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(serde_json::json!({}));

    let Some(tool) = tools.iter().find(|t| t.name() == tool_name) else {
        return JsonRpcResponse::error(id, -32602, format!("Tool not found: {tool_name}"));
    };

    match tool.execute(ctx, arguments).await {
        Ok(result) => JsonRpcResponse::success(
            id,
            serde_json::json!({ "content": [{ "type": "text", "text": result }], "isError": false }),
        ),
        Err(e) => {
            tracing::warn!(tool = %tool_name, error = %e, "tool execution failed");
            JsonRpcResponse::success(
                id,
                serde_json::json!({ "content": [{ "type": "text", "text": e.to_string() }], "isError": true }),
            )
        }
    }
}
