//! Temporal query construction: time ranges, filters, and the wire body
//! for the exchange's `entityOperations/query` endpoint.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

use crate::types::TIME_PROPERTY;

/// The exchange resolves `during` queries at whole-second resolution, so one
/// second is the smallest gap that keeps two adjacent ranges disjoint.
pub const WIRE_TICK: Duration = Duration::seconds(1);

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query carries no entity ids")]
    NoEntities,
    #[error("time range is empty: end must be strictly after start")]
    EmptyRange,
    #[error("temporal planning requires a bound time range")]
    MissingTimeRange,
    #[error("{0} filter requires a bounded time range")]
    UnboundedFilter(&'static str),
    #[error("latest-value lookup takes a single entity, this query has {0}")]
    MultipleEntities(usize),
}

/// Closed interval of wall-clock time, always non-empty (`start < end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, QueryError> {
        if start >= end {
            return Err(QueryError::EmptyRange);
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Splits the range at its midpoint, truncated to a whole second.
    ///
    /// The right half starts one [`WIRE_TICK`] after the midpoint so the two
    /// halves stay disjoint on the wire while covering every instant the
    /// parent covers. Returns `None` when the range is too short to yield two
    /// non-empty halves at wire resolution.
    pub fn bisect(&self) -> Option<(TimeRange, TimeRange)> {
        let half = Duration::seconds(self.duration().num_seconds() / 2);
        if half < WIRE_TICK {
            return None;
        }
        let mid = self.start + half;
        let right_start = mid + WIRE_TICK;
        if right_start >= self.end {
            return None;
        }
        Some((
            TimeRange { start: self.start, end: mid },
            TimeRange { start: right_start, end: self.end },
        ))
    }

    /// RFC 3339 at second resolution, the only timestamp shape the exchange
    /// accepts in temporal queries.
    fn wire(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", Self::wire(self.start), Self::wire(self.end))
    }
}

/// Attribute comparison pushed down to the server as the `q` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    pub key: String,
    pub operation: String,
    pub value: String,
}

impl PropertyFilter {
    pub fn new(
        key: impl Into<String>,
        operation: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            operation: operation.into(),
            value: value.into(),
        }
    }

    fn wire(&self) -> String {
        format!("{}{}{}", self.key, self.operation, self.value)
    }
}

/// Spatial constraint pushed down as the `geoQ` object.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFilter {
    pub geoproperty: String,
    pub geometry: String,
    pub georel: String,
    /// Meters; folded into `georel` on the wire as `;maxDistance=N`.
    pub max_distance: Option<u32>,
    /// GeoJSON coordinates, passed through verbatim.
    pub coordinates: Value,
}

impl GeoFilter {
    fn wire(&self) -> Value {
        let georel = match self.max_distance {
            Some(m) => format!("{};maxDistance={}", self.georel, m),
            None => self.georel.clone(),
        };
        json!({
            "geoproperty": self.geoproperty,
            "geometry": self.geometry,
            "georel": georel,
            "coordinates": self.coordinates,
        })
    }
}

/// One `during` query against a set of resources, optionally filtered and
/// paginated. Queries are immutable: every `with_*` builder consumes the
/// receiver and returns the extended copy, so a planner can hold one template
/// and derive per-page variants without aliasing.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    entities: Vec<String>,
    range: Option<TimeRange>,
    property: Option<PropertyFilter>,
    geo: Option<GeoFilter>,
    attrs: Vec<String>,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl Query {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entities: vec![entity.into()],
            range: None,
            property: None,
            geo: None,
            attrs: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    pub fn add_entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.push(entity.into());
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_offset_limit(mut self, offset: u64, limit: u64) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn with_property_filter(mut self, filter: PropertyFilter) -> Self {
        self.property = Some(filter);
        self
    }

    pub fn with_geo_filter(mut self, filter: GeoFilter) -> Self {
        self.geo = Some(filter);
        self
    }

    pub fn with_attrs(mut self, attrs: Vec<String>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        self.range
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Builds the JSON body for `POST /temporal/entityOperations/query`.
    ///
    /// Filters only make sense against a bounded range; the server rejects
    /// unbounded scans, so we do too before spending a round trip.
    pub fn to_body(&self) -> Result<Value, QueryError> {
        if self.entities.is_empty() {
            return Err(QueryError::NoEntities);
        }
        let entities: Vec<Value> = self.entities.iter().map(|id| json!({ "id": id })).collect();
        let mut body = json!({
            "type": "Query",
            "entities": entities,
        });
        if let Some(range) = &self.range {
            body["temporalQ"] = json!({
                "timerel": "during",
                "time": TimeRange::wire(range.start),
                "endtime": TimeRange::wire(range.end),
                "timeProperty": TIME_PROPERTY,
            });
        }
        if let Some(property) = &self.property {
            if self.range.is_none() {
                return Err(QueryError::UnboundedFilter("property"));
            }
            body["q"] = Value::String(property.wire());
        }
        if let Some(geo) = &self.geo {
            if self.range.is_none() {
                return Err(QueryError::UnboundedFilter("geo"));
            }
            body["geoQ"] = geo.wire();
        }
        if !self.attrs.is_empty() {
            body["attrs"] = Value::String(self.attrs.join(","));
        }
        Ok(body)
    }

    /// Path of the latest-value endpoint, `GET /entities/{id}`. Entity ids
    /// contain slashes and go on the path verbatim.
    pub fn latest_path(&self) -> Result<String, QueryError> {
        match self.entities.as_slice() {
            [] => Err(QueryError::NoEntities),
            [id] => Ok(format!("/entities/{id}")),
            many => Err(QueryError::MultipleEntities(many.len())),
        }
    }
}
