//! Two-tier OAuth state store.
//!
//! L1 is an in-process map guarded by a single `tokio::sync::RwLock`. L2 is
//! upstream REST persistence under `/api/internal/oauth/{clients,sessions,codes,tokens}`:
//! the L1 critical section is released *before* the L2 call is issued, so
//! OAuth-flow correctness never depends on L2 success, and reads fall back to
//! L2 on an L1 miss, repopulating L1 opportunistically. An empty upstream base
//! URL (`UpstreamClient::is_configured` false) disables L2 entirely; L1 remains
//! authoritative for single-process test mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use reqwest::Method;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::types::{AuthCode, AuthSession, IdentityClaims, OAuthClient, RefreshToken, SessionStatus};
use crate::upstream::UpstreamClient;

/// Cleanup interval for expired sessions/codes/tokens.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Two-tier store for OAuth clients, pending authorization sessions, single-use
/// codes, and rotating refresh tokens.
#[derive(Clone)]
pub struct OAuthStore {
    clients: Arc<RwLock<HashMap<String, OAuthClient>>>,
    sessions: Arc<RwLock<HashMap<String, AuthSession>>>,
    auth_codes: Arc<RwLock<HashMap<String, AuthCode>>>,
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshToken>>>,
    upstream: UpstreamClient,
    session_seq: AtomicU64,
}

impl OAuthStore {
    #[must_use]
    pub fn new(upstream: UpstreamClient) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            auth_codes: Arc::new(RwLock::new(HashMap::new())),
            refresh_tokens: Arc::new(RwLock::new(HashMap::new())),
            upstream,
            session_seq: AtomicU64::new(0),
        }
    }

    /// `byte_len` bytes of randomness, base64url (no padding) encoded — at least
    /// 256 bits of entropy for `byte_len >= 32`.
    fn random_token(byte_len: usize) -> String {
        let mut bytes = vec![0u8; byte_len];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn hash_token(plaintext: &str) -> String {
        let digest = Sha256::digest(plaintext.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// 32 random bytes, hex-encoded, used for generated `client_secret` values.
    fn random_hex_secret() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    // ---- Clients ---------------------------------------------------------------

    /// Register a new OAuth client (RFC 7591 DCR).
    pub async fn register_client(
        &self,
        client_name: Option<String>,
        redirect_uris: Vec<String>,
        token_endpoint_auth_method: String,
        grant_types: Vec<String>,
        response_types: Vec<String>,
        scope: String,
    ) -> OAuthClient {
        let client_id = uuid::Uuid::new_v4().to_string();
        let client_secret =
            (token_endpoint_auth_method != "none").then(Self::random_hex_secret);

        let client = OAuthClient {
            client_id: client_id.clone(),
            client_secret,
            client_name,
            redirect_uris,
            token_endpoint_auth_method,
            grant_types,
            response_types,
            scope,
            created_at: Utc::now(),
        };

        self.clients.write().await.insert(client_id.clone(), client.clone());

        if self.upstream.is_configured() {
            let body = serde_json::to_value(&client).unwrap_or_default();
            let path = format!("/api/internal/oauth/clients/{client_id}");
            if let Err(e) = self.upstream.send_json(Method::PUT, &path, &body).await {
                tracing::warn!(error = %e, client_id, "L2 write-through failed for client registration");
            }
        }

        client
    }

    /// Auto-create a client record the first time an unknown `client_id` is seen at
    /// `/authorize` under lenient mode (Claude Desktop compatibility).
    pub async fn auto_register_client(&self, client_id: &str, redirect_uri: &str) -> OAuthClient {
        let client = OAuthClient {
            client_id: client_id.to_owned(),
            client_secret: None,
            client_name: None,
            redirect_uris: vec![redirect_uri.to_owned()],
            token_endpoint_auth_method: "none".into(),
            grant_types: vec!["authorization_code".into(), "refresh_token".into()],
            response_types: vec!["code".into()],
            scope: String::new(),
            created_at: Utc::now(),
        };
        self.clients.write().await.insert(client_id.to_owned(), client.clone());
        client
    }

    /// Look up a client, falling through to L2 on miss.
    pub async fn get_client(&self, client_id: &str) -> Option<OAuthClient> {
        if let Some(client) = self.clients.read().await.get(client_id).cloned() {
            return Some(client);
        }
        if !self.upstream.is_configured() {
            return None;
        }
        let path = format!("/api/internal/oauth/clients/{client_id}");
        match self.upstream.get_json::<OAuthClient>(&path).await {
            Ok(Some(client)) => {
                self.clients.write().await.insert(client_id.to_owned(), client.clone());
                Some(client)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, client_id, "L2 read-through failed for client lookup");
                None
            }
        }
    }

    // ---- Sessions ----------------------------------------------------------------

    /// Create a pending authorization session at `/authorize`.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_session(
        &self,
        client_id: String,
        redirect_uri: String,
        scope: String,
        state: String,
        code_challenge: String,
        code_challenge_method: String,
    ) -> AuthSession {
        let seq = self.session_seq.fetch_add(1, Ordering::Relaxed);
        let session_id = format!("{}-{seq}", uuid::Uuid::new_v4());
        let session = AuthSession {
            session_id: session_id.clone(),
            client_id,
            redirect_uri,
            scope,
            state,
            code_challenge,
            code_challenge_method,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
        };

        self.sessions.write().await.insert(session_id.clone(), session.clone());
        self.write_through_session(&session).await;
        session
    }

    /// Look up a pending session by its `mcp_session_id` cookie value.
    pub async fn get_session(&self, session_id: &str) -> Option<AuthSession> {
        if let Some(session) = self.sessions.read().await.get(session_id).cloned() {
            if session.is_expired() {
                return None;
            }
            return Some(session);
        }
        if !self.upstream.is_configured() {
            return None;
        }
        let path = format!("/api/internal/oauth/sessions/{session_id}");
        match self.upstream.get_json::<AuthSession>(&path).await {
            Ok(Some(session)) if !session.is_expired() => {
                self.sessions.write().await.insert(session_id.to_owned(), session.clone());
                Some(session)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, session_id, "L2 read-through failed for session lookup");
                None
            }
        }
    }

    /// Attach a `user_id` to a pending session once login completes
    /// (`Pending -> Authenticated`).
    pub async fn authenticate_session(&self, session_id: &str, user_id: String) -> Option<AuthSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;
        if session.is_expired() || !matches!(session.status, SessionStatus::Pending) {
            return None;
        }
        session.status = SessionStatus::Authenticated { user_id };
        let updated = session.clone();
        drop(sessions);
        self.write_through_session(&updated).await;
        Some(updated)
    }

    /// Delete a session (on code issuance, or expiry cleanup).
    pub async fn delete_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
        if self.upstream.is_configured() {
            let path = format!("/api/internal/oauth/sessions/{session_id}");
            if let Err(e) = self.upstream.delete(&path).await {
                tracing::warn!(error = %e, session_id, "L2 delete failed for session");
            }
        }
    }

    async fn write_through_session(&self, session: &AuthSession) {
        if !self.upstream.is_configured() {
            return;
        }
        let body = serde_json::to_value(session).unwrap_or_default();
        let path = format!("/api/internal/oauth/sessions/{}", session.session_id);
        if let Err(e) = self.upstream.send_json(Method::PUT, &path, &body).await {
            tracing::warn!(error = %e, session_id = %session.session_id, "L2 write-through failed for session");
        }
    }

    // ---- Authorization codes ------------------------------------------------------

    /// Issue a single-use authorization code after a completed authorization.
    /// `identity` is carried through unchanged so the `/token` exchange can
    /// mint an access token with the same projected claims the browser
    /// session cookie already got at login time.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_auth_code(
        &self,
        client_id: String,
        user_id: String,
        redirect_uri: String,
        scope: String,
        code_challenge: String,
        code_challenge_method: String,
        identity: IdentityClaims,
    ) -> AuthCode {
        let code = Self::random_token(32);
        let auth_code = AuthCode {
            code: code.clone(),
            client_id,
            user_id,
            redirect_uri,
            scope,
            code_challenge,
            code_challenge_method,
            used: false,
            created_at: Utc::now(),
            identity,
        };

        self.auth_codes.write().await.insert(code.clone(), auth_code.clone());

        if self.upstream.is_configured() {
            let body = serde_json::to_value(&auth_code).unwrap_or_default();
            let path = format!("/api/internal/oauth/codes/{code}");
            if let Err(e) = self.upstream.send_json(Method::PUT, &path, &body).await {
                tracing::warn!(error = %e, "L2 write-through failed for auth code");
            }
        }

        auth_code
    }

    /// Atomically fetch-if-unused-and-mark a code. The check ("unused, not
    /// expired") and the mutation ("mark used") happen under
    /// the same write-lock guard, so two concurrent `/token` exchanges for the same
    /// code cannot both succeed.
    pub async fn consume_auth_code(&self, code: &str) -> Option<AuthCode> {
        let mut codes = self.auth_codes.write().await;
        let entry = codes.get_mut(code)?;
        if entry.used || entry.is_expired() {
            return None;
        }
        entry.used = true;
        let consumed = entry.clone();
        drop(codes);

        if self.upstream.is_configured() {
            let body = serde_json::to_value(&consumed).unwrap_or_default();
            let path = format!("/api/internal/oauth/codes/{code}");
            if let Err(e) = self.upstream.send_json(Method::PUT, &path, &body).await {
                tracing::warn!(error = %e, "L2 write-through failed marking code used");
            }
        }

        Some(consumed)
    }

    // ---- Refresh tokens ------------------------------------------------------------

    /// Issue a new refresh token, returning the plaintext to hand to the client.
    /// Persisted keyed by `sha256(plaintext)` — the plaintext itself is never stored.
    pub async fn create_refresh_token(
        &self,
        client_id: String,
        user_id: String,
        scope: String,
        identity: IdentityClaims,
    ) -> String {
        let plaintext = Self::random_token(32);
        let hash = Self::hash_token(&plaintext);
        let token = RefreshToken { client_id, user_id, scope, created_at: Utc::now(), identity };

        self.refresh_tokens.write().await.insert(hash.clone(), token.clone());

        if self.upstream.is_configured() {
            let body = serde_json::to_value(&token).unwrap_or_default();
            let path = format!("/api/internal/oauth/tokens/{hash}");
            if let Err(e) = self.upstream.send_json(Method::PUT, &path, &body).await {
                tracing::warn!(error = %e, "L2 write-through failed for refresh token");
            }
        }

        plaintext
    }

    /// Rotate a refresh token: the old record is deleted before the new one is
    /// returned to the caller for re-issuance. Reuse of an already-rotated
    /// plaintext fails because the hash lookup misses.
    pub async fn consume_refresh_token(&self, plaintext: &str) -> Option<RefreshToken> {
        let hash = Self::hash_token(plaintext);
        let removed = {
            let mut tokens = self.refresh_tokens.write().await;
            tokens.remove(&hash)
        };
        let token = removed?;
        if token.is_expired() {
            return None;
        }

        if self.upstream.is_configured() {
            let path = format!("/api/internal/oauth/tokens/{hash}");
            if let Err(e) = self.upstream.delete(&path).await {
                tracing::warn!(error = %e, "L2 delete failed for consumed refresh token");
            }
        }

        Some(token)
    }

    /// Start the background cleanup task for expired sessions/codes/tokens.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        });
    }

    async fn cleanup_expired(&self) {
        {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|_, s| !s.is_expired());
        }
        {
            let mut codes = self.auth_codes.write().await;
            let before = codes.len();
            codes.retain(|_, c| !c.is_expired());
            let removed = before - codes.len();
            if removed > 0 {
                tracing::debug!(count = removed, "cleaned up expired auth codes");
            }
        }
        {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, t| !t.is_expired());
            let removed = before - tokens.len();
            if removed > 0 {
                tracing::debug!(count = removed, "cleaned up expired refresh tokens");
            }
        }
    }
}

impl std::fmt::Debug for OAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> OAuthStore {
        OAuthStore::new(UpstreamClient::new("", None, None))
    }

    #[tokio::test]
    async fn register_and_lookup_client() {
        let store = store();
        let client = store
            .register_client(
                Some("Test App".into()),
                vec!["https://client.example/cb".into()],
                "client_secret_post".into(),
                vec!["authorization_code".into(), "refresh_token".into()],
                vec!["code".into()],
                "tools:invoke".into(),
            )
            .await;

        assert!(client.client_secret.is_some());
        let looked_up = store.get_client(&client.client_id).await;
        assert!(looked_up.is_some());
        assert_eq!(looked_up.unwrap().client_name.as_deref(), Some("Test App"));
    }

    #[tokio::test]
    async fn public_client_has_no_secret() {
        let store = store();
        let client = store
            .register_client(
                None,
                vec!["https://client.example/cb".into()],
                "none".into(),
                vec!["authorization_code".into()],
                vec!["code".into()],
                String::new(),
            )
            .await;
        assert!(client.client_secret.is_none());
    }

    #[tokio::test]
    async fn session_bridge_lifecycle() {
        let store = store();
        let session = store
            .create_session(
                "c1".into(),
                "https://client.example/cb".into(),
                "tools:invoke".into(),
                "xyz".into(),
                "challenge".into(),
                "S256".into(),
                IdentityClaims::default(),
            )
            .await;

        assert_eq!(store.get_session(&session.session_id).await.unwrap().status, SessionStatus::Pending);

        let authenticated = store.authenticate_session(&session.session_id, "u1".into()).await;
        assert!(authenticated.is_some());
        assert_eq!(authenticated.unwrap().user_id(), Some("u1"));

        // Already authenticated: a second attempt must not clobber it back to pending.
        assert!(store.authenticate_session(&session.session_id, "u2".into()).await.is_none());

        store.delete_session(&session.session_id).await;
        assert!(store.get_session(&session.session_id).await.is_none());
    }

    #[tokio::test]
    async fn auth_code_single_use() {
        let store = store();
        let code = store
            .create_auth_code(
                "c1".into(),
                "u1".into(),
                "https://client.example/cb".into(),
                "tools:invoke".into(),
                "challenge".into(),
                "S256".into(),
                IdentityClaims::default(),
            )
            .await;

        let consumed = store.consume_auth_code(&code.code).await;
        assert!(consumed.is_some());
        assert_eq!(consumed.unwrap().user_id, "u1");

        // Second consume of the same code fails.
        assert!(store.consume_auth_code(&code.code).await.is_none());
    }

    #[tokio::test]
    async fn refresh_token_rotation_rejects_reuse() {
        let store = store();
        let plaintext =
            store.create_refresh_token("c1".into(), "u1".into(), "tools:invoke".into(), IdentityClaims::default()).await;

        let consumed = store.consume_refresh_token(&plaintext).await;
        assert!(consumed.is_some());

        // Reuse of the same plaintext fails — the hash entry was already removed.
        assert!(store.consume_refresh_token(&plaintext).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_code_consumption_only_one_wins() {
        let store = Arc::new(store());
        let code = store
            .create_auth_code(
                "c1".into(),
                "u1".into(),
                "https://client.example/cb".into(),
                "tools:invoke".into(),
                "challenge".into(),
                "S256".into(),
                IdentityClaims::default(),
            )
            .await;

        let a = {
            let store = store.clone();
            let code = code.code.clone();
            tokio::spawn(async move { store.consume_auth_code(&code).await })
        };
        let b = {
            let store = store.clone();
            let code = code.code.clone();
            tokio::spawn(async move { store.consume_auth_code(&code).await })
        };

        let (a, b) = tokio::join!(a, b);
        let successes = [a.unwrap(), b.unwrap()].into_iter().filter(Option::is_some).count();
        assert_eq!(successes, 1);
    }
}
