//! Token acquisition seam and header materialization.
//!
//! The query pipeline never talks to an authorization server itself; it
//! receives a ready-made header map. This module is where that map is
//! built from whatever produced the token.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token provider returned an empty token")]
    EmptyToken,
    #[error("token is not usable as a header value")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
    #[error("token request failed: {0}")]
    Provider(String),
}

/// Source of access tokens, opaque to the rest of the crate.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn request_token(&self) -> Result<String, AuthError>;
}

/// A token obtained out of band and handed in as-is.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn request_token(&self) -> Result<String, AuthError> {
        if self.0.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        Ok(self.0.clone())
    }
}

/// Headers for anonymous access to open resources.
pub fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Headers carrying a bearer token, for access-controlled resources.
pub fn bearer_headers(token: &str) -> Result<HeaderMap, AuthError> {
    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }
    let mut headers = base_headers();
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}
