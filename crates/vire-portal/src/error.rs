//! Error types for the Vire portal.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Every variant here is converted to a documented OAuth error payload, an MCP error
//! result, or a plain HTTP status at the handler boundary — internal errors never leak
//! as opaque 500s on a path that has a defined failure mode.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Errors from the upstream REST client (backend persistence, catalog fetch, service auth).
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("upstream HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Middleware error (retry policy exhausted, etc.)
    #[error("upstream middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// Non-2xx response from upstream.
    #[error("upstream returned {status}: {body}")]
    Status {
        /// HTTP status code returned by upstream.
        status: u16,
        /// Response body excerpt (bounded, for error surfacing).
        body: String,
    },

    /// Response body exceeded the configured cap before it could be fully read.
    #[error("upstream response exceeded {limit} bytes")]
    BodyTooLarge {
        /// The configured limit that was exceeded.
        limit: usize,
    },

    /// JSON parsing error.
    #[error("failed to parse upstream response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl UpstreamError {
    #[must_use]
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status { status, body: body.into() }
    }
}

/// Errors surfaced by OAuth endpoints. Each maps to an RFC 6749 §5.2 error code.
#[derive(thiserror::Error, Debug)]
pub enum OAuthError {
    /// Missing or malformed request parameters.
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Unknown or unresolvable client.
    #[error("invalid_client: {0}")]
    InvalidClient(String),

    /// Expired/invalid/replayed grant (code, refresh token, PKCE mismatch, secret mismatch).
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// Client metadata failed RFC 7591 validation.
    #[error("invalid_client_metadata: {0}")]
    InvalidClientMetadata(String),

    /// Requested grant type is not one of the two supported.
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    /// redirect_uri does not exactly match a registered URI.
    #[error("invalid redirect_uri")]
    RedirectMismatch,
}

impl OAuthError {
    /// The RFC 6749 §5.2 error code for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidClientMetadata(_) => "invalid_client_metadata",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::RedirectMismatch => "invalid_request",
        }
    }

    fn description(&self) -> String {
        match self {
            Self::InvalidRequest(m)
            | Self::InvalidClient(m)
            | Self::InvalidGrant(m)
            | Self::InvalidClientMetadata(m)
            | Self::UnsupportedGrantType(m) => m.clone(),
            Self::RedirectMismatch => "redirect_uri not registered for this client".to_string(),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": self.code(),
                "error_description": self.description(),
            })),
        )
            .into_response()
    }
}

/// Errors from the tool catalog and proxy engine.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    /// Upstream catalog fetch failed after all retries.
    #[error("catalog fetch failed: {0}")]
    FetchFailed(#[from] UpstreamError),

    /// Upstream tool call returned a non-2xx response or transport error.
    #[error("tool call to {path} failed: {status} {body}")]
    ToolCallFailed {
        /// The upstream path that was invoked.
        path: String,
        /// HTTP status code (0 for transport-level failures).
        status: u16,
        /// Response body excerpt.
        body: String,
    },

    /// A required path/query/body parameter was missing and had no `default_from` fallback.
    #[error("missing required parameter: {0}")]
    MissingParam(String),
}

/// Result alias for catalog/proxy operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Result alias for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Result alias for OAuth operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_error_codes_match_rfc6749() {
        assert_eq!(OAuthError::InvalidRequest("x".into()).code(), "invalid_request");
        assert_eq!(OAuthError::InvalidGrant("x".into()).code(), "invalid_grant");
        assert_eq!(
            OAuthError::InvalidClientMetadata("x".into()).code(),
            "invalid_client_metadata"
        );
        assert_eq!(OAuthError::UnsupportedGrantType("x".into()).code(), "unsupported_grant_type");
    }
}
