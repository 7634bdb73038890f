//! Fetches one query against the exchange and normalizes the response
//! envelope into a [`Page`].

use reqwest::{header::HeaderMap, Method};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::query::{Query, QueryError};
use crate::transport::{Transport, TransportError, WireResponse};
use crate::types::{Page, PageStatus, Record};

/// The exchange's response envelope. Pagination metadata is genuinely
/// optional: a latest-value response carries none, and that is different
/// from carrying zeros.
#[derive(Debug, Deserialize)]
struct Envelope {
    title: Option<String>,
    detail: Option<String>,
    #[serde(default)]
    results: Vec<Record>,
    offset: Option<u64>,
    limit: Option<u64>,
    #[serde(rename = "totalHits")]
    total_hits: Option<u64>,
}

/// Issues single queries and classifies their outcomes.
///
/// Only a malformed [`Query`] is an `Err` here, raised before any network
/// traffic. Every remote or transport outcome becomes a [`Page`]: 401 maps
/// to `Unauthorized` (fatal to the enclosing batch), everything else that
/// is not a clean 200 maps to `OtherError` (non-fatal, skipped with a
/// warning by the aggregator).
#[derive(Clone)]
pub struct PageFetcher {
    transport: Arc<dyn Transport>,
    base_url: String,
    headers: HeaderMap,
}

impl PageFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        headers: HeaderMap,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            transport,
            base_url,
            headers,
        }
    }

    /// Issue a temporal query: `POST {base}/temporal/entityOperations/query`.
    /// Offset and limit travel as URL parameters, the rest in the JSON body.
    pub async fn fetch(&self, query: &Query) -> Result<Page, QueryError> {
        let body = query.to_body()?;

        let mut url = format!("{}/temporal/entityOperations/query", self.base_url);
        let mut sep = '?';
        if let Some(offset) = query.offset() {
            url.push_str(&format!("{sep}offset={offset}"));
            sep = '&';
        }
        if let Some(limit) = query.limit() {
            url.push_str(&format!("{sep}limit={limit}"));
        }

        let response = self
            .transport
            .send(Method::POST, &url, &self.headers, Some(&body))
            .await;
        Ok(classify(response))
    }

    /// Fetch the current value of a single entity: `GET {base}/entities/{id}`.
    pub async fn fetch_latest(&self, query: &Query) -> Result<Page, QueryError> {
        let url = format!("{}{}", self.base_url, query.latest_path()?);

        let response = self
            .transport
            .send(Method::GET, &url, &self.headers, None)
            .await;
        Ok(classify(response))
    }
}

fn classify(response: Result<WireResponse, TransportError>) -> Page {
    let wire = match response {
        Ok(wire) => wire,
        Err(err) => {
            tracing::warn!("transport failure: {}", err);
            return Page::failure(format!("transport failure: {err}"), None);
        }
    };

    match wire.status {
        401 => Page::unauthorized(),
        200 => match decode(&wire) {
            Some(envelope) => Page {
                status: PageStatus::Success,
                results: envelope.results,
                total_hits: envelope.total_hits,
                offset: envelope.offset,
                limit: envelope.limit,
                title: envelope.title.unwrap_or_default(),
                detail: envelope.detail,
            },
            None => Page::failure("malformed response body", None),
        },
        status => {
            // Error envelopes still carry a human-readable title/detail
            // worth keeping for diagnostics.
            let (title, detail) = match decode(&wire) {
                Some(envelope) => (
                    envelope.title.unwrap_or_else(|| format!("HTTP {status}")),
                    envelope.detail,
                ),
                None => (format!("HTTP {status}"), None),
            };
            tracing::warn!("remote error {}: {}", status, title);
            Page::failure(title, detail)
        }
    }
}

fn decode(wire: &WireResponse) -> Option<Envelope> {
    let value: Value = wire.json().ok()?;
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(status: u16, body: &str) -> Result<WireResponse, TransportError> {
        Ok(WireResponse {
            status,
            body: body.to_string(),
        })
    }

    #[test]
    fn test_classify_success_keeps_unset_fields_unset() {
        let page = classify(wire(
            200,
            r#"{"type":"urn:dx:rs:success","title":"Success","results":[{"id":"a"}]}"#,
        ));
        assert_eq!(page.status, PageStatus::Success);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.total_hits, None);
        assert_eq!(page.offset, None);
        assert_eq!(page.limit, None);
    }

    #[test]
    fn test_classify_success_with_pagination() {
        let page = classify(wire(
            200,
            r#"{"title":"Success","results":[],"offset":5000,"limit":5000,"totalHits":12345}"#,
        ));
        assert_eq!(page.status, PageStatus::Success);
        assert_eq!(page.total_hits, Some(12345));
        assert_eq!(page.offset, Some(5000));
        assert_eq!(page.limit, Some(5000));
    }

    #[test]
    fn test_classify_unauthorized_ignores_body() {
        let page = classify(wire(401, "anything at all"));
        assert_eq!(page.status, PageStatus::Unauthorized);
    }

    #[test]
    fn test_classify_remote_error_keeps_title_and_detail() {
        let page = classify(wire(
            400,
            r#"{"type":"urn:dx:rs:badRequest","title":"Bad Request","detail":"bad geo param"}"#,
        ));
        assert_eq!(page.status, PageStatus::OtherError);
        assert_eq!(page.title, "Bad Request");
        assert_eq!(page.detail.as_deref(), Some("bad geo param"));
    }

    #[test]
    fn test_classify_undecodable_error_falls_back_to_status() {
        let page = classify(wire(502, "<html>bad gateway</html>"));
        assert_eq!(page.status, PageStatus::OtherError);
        assert_eq!(page.title, "HTTP 502");
    }

    #[test]
    fn test_classify_malformed_success_body() {
        let page = classify(wire(200, "not json"));
        assert_eq!(page.status, PageStatus::OtherError);
        assert_eq!(page.title, "malformed response body");
    }
}
