//! Core value types shared across the query pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name of the timestamp property the exchange attaches to every
/// observation. Used both in the wire query (`temporalQ.timeProperty`)
/// and for ordering aggregated results.
pub const TIME_PROPERTY: &str = "observationDateTime";

/// One observation as returned by the exchange.
///
/// The payload is opaque to the planner; only the observation timestamp
/// is interpreted, for final ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    /// Parse the record's observation timestamp, if present and valid.
    pub fn observation_time(&self) -> Option<DateTime<Utc>> {
        self.0
            .get(TIME_PROPERTY)?
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Outcome classification of one remote response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// HTTP 200 with a decodable envelope.
    Success,
    /// HTTP 401: credentials rejected. Always fatal to the enclosing
    /// batch and plan; never retried.
    Unauthorized,
    /// Anything else: remote application error, transport failure, or an
    /// undecodable body. Non-fatal to sibling work.
    OtherError,
}

/// One normalized response page.
///
/// Pagination metadata that the envelope omits stays unset: "unset" and
/// "zero" are distinct (a non-paginated response has no `totalHits` at all).
#[derive(Debug, Clone)]
pub struct Page {
    pub status: PageStatus,
    pub results: Vec<Record>,
    pub total_hits: Option<u64>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    /// Human-readable outcome summary from the remote envelope.
    pub title: String,
    /// Extended diagnostics, when the remote supplies them.
    pub detail: Option<String>,
}

impl Page {
    /// Page for a 401 response.
    pub fn unauthorized() -> Self {
        Self {
            status: PageStatus::Unauthorized,
            results: Vec::new(),
            total_hits: None,
            offset: None,
            limit: None,
            title: "invalid credentials".to_string(),
            detail: None,
        }
    }

    /// Page for a failed request (remote error, transport failure,
    /// malformed body).
    pub fn failure(title: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            status: PageStatus::OtherError,
            results: Vec::new(),
            total_hits: None,
            offset: None,
            limit: None,
            title: title.into(),
            detail,
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageStatus::Success => write!(f, "success"),
            PageStatus::Unauthorized => write!(f, "unauthorized"),
            PageStatus::OtherError => write!(f, "error"),
        }
    }
}
