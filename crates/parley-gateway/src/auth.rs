// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity resolution for upgrades and REST calls.
//!
//! Credentials are taken from (in order):
//! 1. `Authorization: Bearer <token>`
//! 2. the `token` query parameter (browsers cannot set headers on upgrade)
//!
//! Tokens have the form `<user_id>.<hex(HMAC-SHA256(secret, user_id))>`.
//! When no secret is configured, every token is rejected (fail-closed).

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use parley_core::{IdentityResolver, ParleyError};

type HmacSha256 = Hmac<Sha256>;

/// Resolves signed user tokens.
#[derive(Clone)]
pub struct HmacTokenResolver {
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for HmacTokenResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacTokenResolver")
            .field("secret", &self.secret.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl HmacTokenResolver {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()).map(|s| s.as_bytes().to_vec()),
        }
    }

    fn mac(&self, secret: &[u8], user_id: i64) -> Result<HmacSha256, ParleyError> {
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| ParleyError::Internal(format!("invalid hmac key: {e}")))?;
        mac.update(user_id.to_string().as_bytes());
        Ok(mac)
    }

    /// Mint a token for `user_id`.
    pub fn issue(&self, user_id: i64) -> Result<String, ParleyError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| ParleyError::Config("auth.token_secret is not set".into()))?;
        let tag = self.mac(secret, user_id)?.finalize().into_bytes();
        Ok(format!("{user_id}.{}", hex::encode(tag)))
    }
}

#[async_trait]
impl IdentityResolver for HmacTokenResolver {
    async fn resolve(&self, token: &str) -> Result<i64, ParleyError> {
        let Some(secret) = self.secret.as_deref() else {
            tracing::error!("no token secret configured -- rejecting credentials");
            return Err(ParleyError::Unauthorized("authentication is not configured".into()));
        };
        let rejected = || ParleyError::Unauthorized("invalid token".into());

        let (user, signature) = token.split_once('.').ok_or_else(rejected)?;
        let user_id: i64 = user.parse().map_err(|_| rejected())?;
        let signature = hex::decode(signature).map_err(|_| rejected())?;
        // verify_slice compares in constant time.
        self.mac(secret, user_id)?
            .verify_slice(&signature)
            .map_err(|_| rejected())?;
        Ok(user_id)
    }
}

/// Extract a bearer token from headers, falling back to the `token` query
/// parameter.
pub fn credentials<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or(query_token.filter(|t| !t.is_empty()))
}

/// The caller of an authenticated REST route, inserted by [`require_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub i64);

/// Middleware that resolves the bearer token and rejects the request with
/// 401 when it does not name a user.
pub async fn require_user(
    State(identity): State<Arc<dyn IdentityResolver>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(token) = credentials(request.headers(), None).map(str::to_owned) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    match identity.resolve(&token).await {
        Ok(user_id) => {
            request.extensions_mut().insert(AuthenticatedUser(user_id));
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::debug!(error = %e, "request rejected");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn issued_token_resolves() {
        let resolver = HmacTokenResolver::new(Some("s3cret"));
        let token = resolver.issue(42).unwrap();
        assert!(token.starts_with("42."));
        assert_eq!(resolver.resolve(&token).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn tampered_tokens_are_unauthorized() {
        let resolver = HmacTokenResolver::new(Some("s3cret"));
        let token = resolver.issue(42).unwrap();
        let forged = token.replacen("42.", "43.", 1);
        for bad in [forged.as_str(), "42", "x.abcd", "42.zz", ""] {
            let err = resolver.resolve(bad).await.unwrap_err();
            assert!(matches!(err, ParleyError::Unauthorized(_)), "{bad}");
        }
        let other = HmacTokenResolver::new(Some("other"));
        assert!(other.resolve(&token).await.is_err());
    }

    #[tokio::test]
    async fn missing_secret_fails_closed() {
        let resolver = HmacTokenResolver::new(None);
        assert!(resolver.issue(1).is_err());
        assert!(matches!(
            resolver.resolve("1.00").await.unwrap_err(),
            ParleyError::Unauthorized(_)
        ));
        assert!(HmacTokenResolver::new(Some("")).issue(1).is_err());
    }

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        assert_eq!(credentials(&headers, Some("q")), Some("q"));
        assert_eq!(credentials(&headers, Some("")), None);
        headers.insert("authorization", HeaderValue::from_static("Bearer h"));
        assert_eq!(credentials(&headers, Some("q")), Some("h"));
    }

    #[test]
    fn debug_redacts_secret() {
        let out = format!("{:?}", HmacTokenResolver::new(Some("s3cret")));
        assert!(!out.contains("s3cret"));
        assert!(out.contains("[redacted]"));
    }
}
