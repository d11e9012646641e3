//! OAuth/MCP data model.
//!
//! Every type here is `Serialize + Deserialize` because the store's L2 tier
//! round-trips these exact shapes through upstream's
//! `/api/internal/oauth/{sessions,clients,codes,tokens}` endpoints
//! (write-through on mutation, read-through on L1 miss). `created_at` uses
//! `chrono::DateTime<Utc>` rather than `std::time::Instant` for this reason —
//! `Instant` is process-local and cannot survive a JSON round trip.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// A dynamically registered OAuth client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    /// Present for confidential clients, `None` for public (`token_endpoint_auth_method = "none"`).
    pub client_secret: Option<String>,
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub scope: String,
    pub created_at: DateTime<Utc>,
}

impl OAuthClient {
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    /// Exact match only — prefix/substring matching is forbidden.
    #[must_use]
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }
}

/// A pending MCP authorization, created at `/authorize` before the user is
/// known. TTL 10 minutes from creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub session_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

/// Explicit tagged state machine for authorization sessions. Transitions are
/// guarded by the session store lock; `Consumed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Authenticated { user_id: String },
    Consumed,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() - self.created_at > ChronoDuration::seconds(600)
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match &self.status {
            SessionStatus::Authenticated { user_id } => Some(user_id),
            _ => None,
        }
    }
}

/// Provider-sourced identity attributes projected onto every JWT minted
/// downstream of a login: the `vire_session` browser cookie, and — carried
/// through `AuthCode` and `RefreshToken` — the MCP access token minted at
/// `/token`. Keeps the two mints in sync without re-deriving the identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Single-use authorization code. TTL 60 seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten, default)]
    pub identity: IdentityClaims,
}

impl AuthCode {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() - self.created_at > ChronoDuration::seconds(60)
    }
}

/// Opaque rotating refresh token. Stored keyed by `sha256(plaintext)` hex —
/// the plaintext itself is never persisted. Long TTL (30 days).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten, default)]
    pub identity: IdentityClaims,
}

impl RefreshToken {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() - self.created_at > ChronoDuration::days(30)
    }
}

/// Claims minted into every access-token JWT and the `vire_session` browser
/// cookie. Not stored — the JWT itself is the persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Identity source for the session bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginProvider {
    Password,
    Google,
    Github,
    Dev,
}

impl LoginProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Google => "google",
            Self::Github => "github",
            Self::Dev => "dev",
        }
    }
}
