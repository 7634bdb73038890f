//! In-memory stand-in for a resource server, shared by the executor and
//! planner tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Method, Url};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::transport::{Transport, TransportError, WireResponse};

/// Shorthand for RFC 3339 instants in tests.
pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("test timestamps are RFC 3339")
        .with_timezone(&Utc)
}

#[derive(Default)]
struct Gauge {
    current: usize,
    peak: usize,
}

/// Fake exchange holding one synthetic time series.
///
/// Temporal queries slice the series by the request's own time bounds (both
/// ends inclusive, like the real `during` relation) and its offset/limit URL
/// parameters, so pagination and bisection arithmetic are exercised against
/// honest `totalHits`. Latest-value lookups return the newest observation
/// with no pagination metadata at all.
///
/// Faults are injected by request ordinal, counted from zero in dispatch
/// order, and answer before any configured latency so a fatal response can
/// land while slower siblings are still in flight.
pub struct MockExchange {
    instants: Vec<DateTime<Utc>>,
    paginated: bool,
    delay: Option<std::time::Duration>,
    unauthorized_at: HashSet<usize>,
    error_at: HashSet<usize>,
    calls: AtomicUsize,
    served: AtomicUsize,
    gauge: Mutex<Gauge>,
    authorization: Mutex<Option<String>>,
}

impl MockExchange {
    /// `count` observations spaced `step` apart, starting at `start`.
    pub fn uniform(start: DateTime<Utc>, count: usize, step: Duration) -> Self {
        Self::at_instants((0..count).map(|i| start + step * i as i32))
    }

    /// Observations at exactly the given instants, in ascending order.
    pub fn at_instants(instants: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        Self {
            instants: instants.into_iter().collect(),
            paginated: true,
            delay: None,
            unauthorized_at: HashSet::new(),
            error_at: HashSet::new(),
            calls: AtomicUsize::new(0),
            served: AtomicUsize::new(0),
            gauge: Mutex::new(Gauge::default()),
            authorization: Mutex::new(None),
        }
    }

    /// Latency added to every regular response.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The given request ordinals answer 401.
    pub fn with_unauthorized_at(mut self, ordinals: impl IntoIterator<Item = usize>) -> Self {
        self.unauthorized_at = ordinals.into_iter().collect();
        self
    }

    /// The given request ordinals answer 400 with an error envelope.
    pub fn with_error_at(mut self, ordinals: impl IntoIterator<Item = usize>) -> Self {
        self.error_at = ordinals.into_iter().collect();
        self
    }

    /// Emulates an exchange build that never paginates: temporal responses
    /// carry every matching record and no pagination metadata.
    pub fn without_pagination(mut self) -> Self {
        self.paginated = false;
        self
    }

    /// Responses fully served, injected faults included. A request cancelled
    /// mid-delay never counts.
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    /// Most requests ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.lock().unwrap().peak
    }

    /// Last `Authorization` header value seen, if any.
    pub fn seen_authorization(&self) -> Option<String> {
        self.authorization.lock().unwrap().clone()
    }

    fn record(&self, index: usize) -> Value {
        json!({
            "id": format!("rec-{index}"),
            "observationDateTime": self.instants[index]
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            "co2": 400 + (index % 60),
        })
    }

    /// Indices of the observations inside the request's time bounds.
    fn matching(&self, body: Option<&Value>) -> Vec<usize> {
        let bounds = body.and_then(|b| b.get("temporalQ")).and_then(|t| {
            Some((instant_field(t, "time")?, instant_field(t, "endtime")?))
        });
        self.instants
            .iter()
            .enumerate()
            .filter(|(_, at)| match bounds {
                Some((start, end)) => **at >= start && **at <= end,
                None => true,
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn temporal_response(&self, url: &Url, body: Option<&Value>) -> Value {
        let matching = self.matching(body);
        if !self.paginated {
            let results: Vec<Value> = matching.iter().map(|&i| self.record(i)).collect();
            return json!({
                "type": "urn:dx:rs:success",
                "title": "Success",
                "results": results,
            });
        }

        let mut offset = 0usize;
        let mut limit = matching.len();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "offset" => offset = value.parse().unwrap_or(0),
                "limit" => limit = value.parse().unwrap_or(limit),
                _ => {}
            }
        }
        let results: Vec<Value> = matching
            .iter()
            .skip(offset)
            .take(limit)
            .map(|&i| self.record(i))
            .collect();
        json!({
            "type": "urn:dx:rs:success",
            "title": "Success",
            "results": results,
            "offset": offset as u64,
            "limit": limit as u64,
            "totalHits": matching.len() as u64,
        })
    }

    fn latest_response(&self) -> Value {
        let results: Vec<Value> = self
            .instants
            .iter()
            .enumerate()
            .max_by_key(|(_, at)| **at)
            .map(|(i, _)| vec![self.record(i)])
            .unwrap_or_default();
        json!({
            "type": "urn:dx:rs:success",
            "title": "Success",
            "results": results,
        })
    }
}

fn instant_field(temporal: &Value, key: &str) -> Option<DateTime<Utc>> {
    temporal.get(key)?.as_str().map(ts)
}

fn reply(status: u16, envelope: Value) -> WireResponse {
    WireResponse {
        status,
        body: envelope.to_string(),
    }
}

struct FlightGuard<'a> {
    gauge: &'a Mutex<Gauge>,
}

impl<'a> FlightGuard<'a> {
    fn enter(gauge: &'a Mutex<Gauge>) -> Self {
        let mut g = gauge.lock().unwrap();
        g.current += 1;
        g.peak = g.peak.max(g.current);
        Self { gauge }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.lock().unwrap().current -= 1;
    }
}

#[async_trait]
impl Transport for MockExchange {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> Result<WireResponse, TransportError> {
        let ordinal = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(auth) = headers.get(AUTHORIZATION) {
            *self.authorization.lock().unwrap() =
                Some(auth.to_str().unwrap_or_default().to_string());
        }

        if self.unauthorized_at.contains(&ordinal) {
            self.served.fetch_add(1, Ordering::SeqCst);
            return Ok(reply(
                401,
                json!({
                    "type": "urn:dx:rs:invalidAuthorizationToken",
                    "title": "Not Authorized",
                }),
            ));
        }
        if self.error_at.contains(&ordinal) {
            self.served.fetch_add(1, Ordering::SeqCst);
            return Ok(reply(
                400,
                json!({
                    "type": "urn:dx:rs:badRequest",
                    "title": "Bad Request",
                    "detail": "injected fault",
                }),
            ));
        }

        // The guard keeps the in-flight gauge honest even when the future
        // is dropped mid-sleep by a short-circuiting batch.
        let _flight = FlightGuard::enter(&self.gauge);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let url = Url::parse(url).expect("mock receives absolute URLs");
        let envelope = if method == Method::GET && url.path().contains("/entities/") {
            self.latest_response()
        } else {
            self.temporal_response(&url, body)
        };

        self.served.fetch_add(1, Ordering::SeqCst);
        Ok(reply(200, envelope))
    }
}
