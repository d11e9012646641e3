//! Upstream backend client.
//!
//! Provides the async HTTP client used for:
//! - L2 persistence of OAuth state (`oauth::store`)
//! - the startup tool-catalog fetch (`catalog::fetch`)
//! - the `/api/*` browser read-through proxy (`api_proxy`)
//! - the service-identity handshake and user/admin lookups
//!
//! Connection pooling via `reqwest`, retry middleware with exponential
//! backoff via `reqwest-middleware` / `reqwest-retry`. Persistence calls use
//! a bounded 5-second timeout; tool-proxy calls get a much longer one since
//! they wait on the portal's own backend, not on OAuth bookkeeping.

use std::time::Duration;

use moka::future::Cache;
use reqwest::{Client, Method, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

use crate::config::limits;
use crate::error::{UpstreamError, UpstreamResult};

/// TTL for the `get_json` response cache below — kept short since L2 reads
/// back OAuth state that can change underneath the portal.
const GET_CACHE_TTL: Duration = Duration::from_secs(300);
const GET_CACHE_MAX_ENTRIES: u64 = 10_000;

/// Thin wrapper around the upstream backend's REST surface.
#[derive(Clone)]
pub struct UpstreamClient {
    http: ClientWithMiddleware,
    base_url: String,
    service_key: Option<String>,
    portal_id: Option<String>,
    /// Short-lived cache of raw `get_json` response bodies, keyed by path.
    /// Distinct from [`crate::cache::ResponseCache`]: that one serves the
    /// browser `/api/*` proxy with per-user keys, prefix invalidation, and
    /// insertion-order eviction; this one only smooths repeated L2 reads of
    /// the same OAuth-store path within a single process.
    get_cache: Cache<String, Vec<u8>>,
}

impl UpstreamClient {
    /// Build a new upstream client. An empty `base_url` disables persistence entirely
    /// (pure L1 mode, acceptable for single-process test mode).
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        service_key: Option<String>,
        portal_id: Option<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(limits::UPSTREAM_TIMEOUT)
            .connect_timeout(Duration::from_secs(2))
            .gzip(true)
            .build()
            .expect("upstream HTTP client builds with static configuration");

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(2))
            .build_with_max_retries(2);

        let http = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let get_cache = Cache::builder().max_capacity(GET_CACHE_MAX_ENTRIES).time_to_live(GET_CACHE_TTL).build();

        Self { http, base_url: base_url.into(), service_key, portal_id, get_cache }
    }

    /// True when a real upstream endpoint is configured (L2 persistence enabled).
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    fn with_service_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref id) = self.portal_id {
            builder = builder.header("X-Vire-Service-ID", id);
        }
        builder
    }

    /// `GET path`, deserializing a JSON body. Returns `Ok(None)` on 404.
    /// Served from a short-lived in-process cache when available, so a burst
    /// of reads for the same path within `GET_CACHE_TTL` costs one round trip.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> UpstreamResult<Option<T>> {
        if let Some(cached) = self.get_cache.get(path).await {
            return Ok(Some(serde_json::from_slice(&cached).map_err(UpstreamError::Parse)?));
        }

        let req = self.with_service_headers(self.http.get(self.url(path)));
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp).await?;
        let bytes = resp.bytes().await.map_err(UpstreamError::Http)?;
        self.get_cache.insert(path.to_string(), bytes.to_vec()).await;
        Ok(Some(serde_json::from_slice(&bytes).map_err(UpstreamError::Parse)?))
    }

    /// `PUT`/`POST`/`PATCH path` with a JSON body, fire-and-forget-able by the caller.
    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: &serde_json::Value,
    ) -> UpstreamResult<()> {
        let req =
            self.with_service_headers(self.http.request(method, self.url(path))).json(body);
        let resp = req.send().await?;
        ensure_success(resp).await?;
        self.get_cache.invalidate(path).await;
        Ok(())
    }

    /// `DELETE path`.
    pub async fn delete(&self, path: &str) -> UpstreamResult<()> {
        let req = self.with_service_headers(self.http.delete(self.url(path)));
        let resp = req.send().await?;
        ensure_success(resp).await?;
        self.get_cache.invalidate(path).await;
        Ok(())
    }

    /// Register this portal's service identity with upstream (`POST /api/services/register`).
    /// Errors are logged by the caller; a failed handshake does not prevent the portal
    /// from starting (it only degrades to unauthenticated-as-service upstream calls).
    pub async fn register_service(&self) -> UpstreamResult<()> {
        let Some(ref key) = self.service_key else { return Ok(()) };
        let body = serde_json::json!({
            "service_id": self.portal_id,
            "key": key,
        });
        self.send_json(Method::POST, "/api/services/register", &body).await
    }

    /// Exchange a user credential bundle for identity claims (`POST /api/auth/oauth`).
    pub async fn exchange_identity(
        &self,
        body: &serde_json::Value,
    ) -> UpstreamResult<UpstreamIdentity> {
        let req = self
            .with_service_headers(self.http.post(self.url("/api/auth/oauth")))
            .json(body);
        let resp = req.send().await?;
        let resp = ensure_success(resp).await?;
        resp.json::<UpstreamIdentity>().await.map_err(UpstreamError::Http)
    }

    /// Promote a user to a role (`PATCH /api/admin/users/{id}/role`), used for the
    /// additive `admin_users` startup promotion.
    pub async fn set_user_role(&self, user_id: &str, role: &str) -> UpstreamResult<()> {
        let path = format!("/api/admin/users/{user_id}/role");
        self.send_json(Method::PATCH, &path, &serde_json::json!({ "role": role })).await
    }

    /// Fetch all users known to upstream (`GET /api/admin/users`), used to resolve
    /// `admin_users` emails to user ids at startup.
    pub async fn list_users(&self) -> UpstreamResult<Vec<UpstreamUser>> {
        Ok(self.get_json("/api/admin/users").await?.unwrap_or_default())
    }

    /// Execute an arbitrary proxied request against upstream, bounded by `timeout` and
    /// the configured `body_cap` bytes. Used by the tool-proxy engine and the
    /// `/api/*` browser proxy. Never fails on non-2xx — returns the raw status/body so
    /// the caller can decide how to surface it (MCP error result vs HTTP passthrough).
    pub async fn proxy_request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<serde_json::Value>,
        headers: &[(&str, String)],
        timeout: Duration,
        body_cap: usize,
    ) -> UpstreamResult<ProxyResponse> {
        let mut builder = self.http.request(method, self.url(path_and_query)).timeout(timeout);
        for (name, value) in headers {
            builder = builder.header(*name, sanitize_header_value(value));
        }
        if let Some(ref b) = body {
            builder = builder.header("Content-Type", "application/json").json(b);
        }

        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => return Err(UpstreamError::Http(e)),
        };

        let status = resp.status().as_u16();
        let bytes = read_bounded(resp, body_cap).await?;
        Ok(ProxyResponse { status, body: bytes })
    }
}

/// Identity claims returned from `POST /api/auth/oauth`, used to mint the portal's
/// own JWT. The portal never stores or re-signs whatever token upstream issues
/// internally.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct UpstreamIdentity {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub provider: Option<String>,
    pub role: Option<String>,
}

/// A user record as returned by `GET /api/admin/users`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct UpstreamUser {
    pub id: String,
    pub email: String,
}

/// Raw response from a proxied upstream call.
pub struct ProxyResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as a lossy UTF-8 string, truncated for error surfacing.
    #[must_use]
    pub fn body_excerpt(&self, max_len: usize) -> String {
        let text = String::from_utf8_lossy(&self.body);
        if text.len() > max_len {
            format!("{}…", &text[..max_len])
        } else {
            text.into_owned()
        }
    }
}

async fn ensure_success(resp: Response) -> UpstreamResult<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(UpstreamError::status(status, body))
}

async fn read_bounded(resp: Response, cap: usize) -> UpstreamResult<Vec<u8>> {
    use futures::StreamExt;

    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(UpstreamError::Http)?;
        buf.extend_from_slice(&chunk);
        if buf.len() > cap {
            return Err(UpstreamError::BodyTooLarge { limit: cap });
        }
    }
    Ok(buf)
}

/// Strip CR/LF from a header value before it leaves the process, preventing
/// header/request splitting.
#[must_use]
pub fn sanitize_header_value(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}
