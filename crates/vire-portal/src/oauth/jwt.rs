//! HMAC-SHA256 JWT minting and validation.
//!
//! Claims: `sub`, `iat`, `exp`, `iss`, `aud`, `scope`, and optional `provider` /
//! `email` / `name` / `role` projected from the upstream identity. Same shape
//! mints both the MCP access token and the `vire_session` browser cookie.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::types::JwtClaims;

/// Signs and validates portal-issued JWTs against a single HMAC secret.
#[derive(Clone)]
pub struct JwtCodec {
    secret: String,
    issuer: String,
}

/// Input to [`JwtCodec::mint`].
pub struct ClaimInput<'a> {
    pub sub: &'a str,
    pub scope: &'a str,
    pub provider: Option<&'a str>,
    pub email: Option<&'a str>,
    pub name: Option<&'a str>,
    pub role: Option<&'a str>,
}

impl JwtCodec {
    #[must_use]
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self { secret: secret.into(), issuer: issuer.into() }
    }

    /// `true` when `secret` is non-empty. An empty secret disables validation
    /// entirely (forbidden in a production configuration — see
    /// [`crate::config::Config::warn_on_unsafe_settings`]).
    #[must_use]
    pub fn validation_enabled(&self) -> bool {
        !self.secret.is_empty()
    }

    /// Mint a signed JWT with the given TTL, suitable as an access token or the
    /// `vire_session` cookie value.
    #[must_use]
    pub fn mint(&self, claims: &ClaimInput<'_>, ttl: std::time::Duration) -> String {
        let now = chrono::Utc::now().timestamp();
        let payload = JwtClaims {
            sub: claims.sub.to_owned(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
            iss: self.issuer.clone(),
            aud: self.issuer.clone(),
            scope: claims.scope.to_owned(),
            provider: claims.provider.map(str::to_owned),
            email: claims.email.map(str::to_owned),
            name: claims.name.map(str::to_owned),
            role: claims.role.map(str::to_owned),
        };
        encode(&Header::new(Algorithm::HS256), &payload, &EncodingKey::from_secret(self.secret.as_bytes()))
            .expect("HS256 encoding of well-formed claims never fails")
    }

    /// Validate signature, expiry, issuer, and audience. Rejects any `alg` other
    /// than HS256 — including the `alg: none` downgrade attack.
    ///
    /// Returns `None` when validation is disabled (`secret` empty) OR on any
    /// failure; callers that need to distinguish "disabled" from "invalid" should
    /// check [`Self::validation_enabled`] first.
    #[must_use]
    pub fn validate(&self, token: &str) -> Option<JwtClaims> {
        if !self.validation_enabled() {
            return None;
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.set_audience(&[self.issuer.clone()]);
        let data = decode::<JwtClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .ok()?;
        Some(data.claims)
    }
}
