//! HTTP transport seam: one `send` per request, no retries.

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Client, Method};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response body is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Normalized response: status plus the raw body, decoded lazily.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub body: String,
}

impl WireResponse {
    pub fn json(&self) -> Result<Value, TransportError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Executes exactly one HTTP call per invocation. Implementations must not
/// retry; a failed attempt surfaces as a [`TransportError`] and the caller
/// decides what it means.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> Result<WireResponse, TransportError>;
}

/// reqwest-backed transport. Timeouts live here; a timed-out request comes
/// back as `TransportError::Request`, never as an auth failure.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> Result<WireResponse, TransportError> {
        let mut request = self.client.request(method, url).headers(headers.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!("{} -> {} ({} bytes)", url, status, body.len());

        Ok(WireResponse { status, body })
    }
}
