//! Caller identity resolution.
//!
//! `Authenticator::resolve` separates "no session" (`Ok(None)`) from "could
//! not find out" (`Err(AuthError::Unavailable)`) so handlers can treat an
//! identity-service outage differently from an anonymous caller.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::HeaderMap;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;
    /// Resolve the caller's user id from request headers.
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>, AuthError>;
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    let (scheme, rest) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Rejects everyone.  Used when no identity source is configured.
pub struct DisabledAuthenticator;

#[async_trait::async_trait]
impl Authenticator for DisabledAuthenticator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn resolve(&self, _headers: &HeaderMap) -> Result<Option<String>, AuthError> {
        Ok(None)
    }
}

/// Fixed bearer-token → user-id table, configured via `AUTH_TOKENS`.
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// Parse `token:user,token2:user2`.  Entries without a user part are
    /// skipped.
    pub fn parse_pairs(raw: &str) -> HashMap<String, String> {
        raw.split(',')
            .filter_map(|pair| {
                let (token, user) = pair.split_once(':')?;
                let (token, user) = (token.trim(), user.trim());
                if token.is_empty() || user.is_empty() {
                    None
                } else {
                    Some((token.to_string(), user.to_string()))
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Authenticator for StaticTokenAuthenticator {
    fn name(&self) -> &str {
        "static_tokens"
    }

    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>, AuthError> {
        Ok(extract_bearer_token(headers).and_then(|token| self.tokens.get(token).cloned()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    #[serde(default)]
    user_id: Option<String>,
}

/// Delegates session checks to an HTTP endpoint.  The caller's bearer token
/// is forwarded; the endpoint answers `{ "userId": "..." | null }`.
pub struct RemoteAuthenticator {
    url: String,
    client: reqwest::Client,
}

impl RemoteAuthenticator {
    pub fn new(url: String, timeout_ms: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { url, client })
    }
}

#[async_trait::async_trait]
impl Authenticator for RemoteAuthenticator {
    fn name(&self) -> &str {
        "remote"
    }

    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>, AuthError> {
        let Some(token) = extract_bearer_token(headers) else {
            return Ok(None);
        };
        let resp = self
            .client
            .get(&self.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| AuthError::Unavailable(err.to_string()))?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AuthError::Unavailable(format!("verifier returned HTTP {}", status.as_u16())));
        }
        let body: VerifyResponse = resp
            .json()
            .await
            .map_err(|err| AuthError::Unavailable(format!("unreadable verifier response: {err}")))?;
        Ok(body.user_id.filter(|id| !id.trim().is_empty()))
    }
}
