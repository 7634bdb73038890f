//! High-level retrieval facade: resolve an entity, plan its time range,
//! aggregate the leaves.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::aggregate::{aggregate, Dataset};
use crate::auth::{base_headers, bearer_headers, AuthError, StaticToken, TokenProvider};
use crate::batch::{BatchError, BatchExecutor};
use crate::catalogue::{DirectResolver, ResolveError, Resolver};
use crate::fetcher::PageFetcher;
use crate::query::{Query, QueryError, TimeRange};
use crate::splitter::{PlanError, RangeSplitter, SplitterConfig};
use crate::transport::{HttpTransport, Transport, TransportError};
use crate::types::{PageStatus, Record};

#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("no base URL configured")]
    MissingBaseUrl,
    #[error("remote rejected credentials")]
    Unauthorized,
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("worker pool closed")]
    PoolClosed,
}

impl From<PlanError> for TrawlError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Unauthorized => TrawlError::Unauthorized,
            PlanError::InvalidQuery(e) => TrawlError::InvalidQuery(e),
            PlanError::PoolClosed => TrawlError::PoolClosed,
        }
    }
}

impl From<BatchError> for TrawlError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Unauthorized => TrawlError::Unauthorized,
            BatchError::InvalidQuery(e) => TrawlError::InvalidQuery(e),
            BatchError::PoolClosed => TrawlError::PoolClosed,
        }
    }
}

/// One configured session against a resource server.
pub struct Trawler {
    resolver: Arc<dyn Resolver>,
    fetcher: PageFetcher,
    executor: BatchExecutor,
    config: SplitterConfig,
}

impl std::fmt::Debug for Trawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trawler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Trawler {
    pub fn builder() -> TrawlerBuilder {
        TrawlerBuilder::new()
    }

    /// Retrieve every observation for `entity_id` in `range`, however many
    /// pages and splits that takes.
    pub async fn during(&self, entity_id: &str, range: TimeRange) -> Result<Dataset, TrawlError> {
        let descriptor = self.resolver.lookup(entity_id).await?;
        tracing::info!(
            "retrieving {} over {} ({} resources)",
            entity_id,
            range,
            descriptor.resources.len()
        );

        let mut ids = descriptor.resources.into_iter();
        let first = ids.next().ok_or(QueryError::NoEntities)?;
        let mut query = Query::new(first);
        for id in ids {
            query = query.add_entity(id);
        }
        self.retrieve(query.with_time_range(range)).await
    }

    /// Plan and retrieve a prepared temporal query, filters and all. The
    /// query must carry a time range.
    pub async fn retrieve(&self, query: Query) -> Result<Dataset, TrawlError> {
        let splitter = RangeSplitter::new(
            self.fetcher.clone(),
            self.executor.clone(),
            self.config.clone(),
        );
        let leaves = splitter.plan(&query).await?;
        let dataset = aggregate(leaves);

        if dataset.is_complete() {
            tracing::info!("retrieved {} records", dataset.len());
        } else {
            tracing::warn!(
                "retrieved {} records, {} ranges incomplete",
                dataset.len(),
                dataset.warnings.len()
            );
        }
        Ok(dataset)
    }

    /// Current value of each resource behind `entity_id`, time-ascending.
    ///
    /// A resource that fails to answer is skipped with a logged warning; a
    /// credential rejection still fails the whole call.
    pub async fn latest(&self, entity_id: &str) -> Result<Vec<Record>, TrawlError> {
        let descriptor = self.resolver.lookup(entity_id).await?;
        if descriptor.resources.is_empty() {
            return Err(QueryError::NoEntities.into());
        }

        let queries: Vec<Query> = descriptor
            .resources
            .iter()
            .map(|id| Query::new(id.clone()))
            .collect();
        let pages = self.executor.run_latest(&self.fetcher, &queries).await?;

        let mut records = Vec::new();
        for (page, id) in pages.into_iter().zip(&descriptor.resources) {
            match page.status {
                PageStatus::Success => records.extend(page.results),
                _ => tracing::warn!("no latest data for {} ({})", id, page.title),
            }
        }
        records.sort_by_key(Record::observation_time);
        Ok(records)
    }
}

/// Builder wiring transport, credentials, resolution, and splitter limits.
pub struct TrawlerBuilder {
    base_url: Option<String>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    timeout: Duration,
    workers: Option<usize>,
    config: SplitterConfig,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn Resolver>>,
}

impl TrawlerBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            token_provider: None,
            timeout: Duration::from_secs(30),
            workers: None,
            config: SplitterConfig::default(),
            transport: None,
            resolver: None,
        }
    }

    /// Resource server base URL, e.g. `https://rs.cos.example.org/ngsi-ld/v1`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Access token obtained out of band.
    pub fn token(self, token: impl Into<String>) -> Self {
        self.token_provider(Arc::new(StaticToken::new(token)))
    }

    /// Source of access tokens, consulted once at build time.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Per-request timeout of the default HTTP transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap on concurrent requests; defaults to one per available core.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn splitter_config(mut self, config: SplitterConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the HTTP transport, e.g. with a test double.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the entity resolver; defaults to [`DirectResolver`].
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub async fn build(self) -> Result<Trawler, TrawlError> {
        let base_url = self.base_url.ok_or(TrawlError::MissingBaseUrl)?;

        let headers = match &self.token_provider {
            Some(provider) => bearer_headers(&provider.request_token().await?)?,
            None => base_headers(),
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.timeout)?),
        };

        let executor = match self.workers {
            Some(n) => BatchExecutor::new(n),
            None => BatchExecutor::with_default_workers(),
        };

        Ok(Trawler {
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(DirectResolver)),
            fetcher: PageFetcher::new(transport, base_url, headers),
            executor,
            config: self.config,
        })
    }
}

impl Default for TrawlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::EntityDescriptor;
    use crate::testutil::{ts, MockExchange};
    use async_trait::async_trait;
    use chrono::Duration as TimeDelta;

    async fn trawler(mock: Arc<MockExchange>) -> Trawler {
        Trawler::builder()
            .base_url("https://rs.test/ngsi-ld/v1")
            .transport(mock)
            .workers(4)
            .splitter_config(SplitterConfig {
                page_limit: 10,
                max_offset_hits: 100,
                min_split_duration: TimeDelta::seconds(2),
            })
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_requires_a_base_url() {
        let err = Trawler::builder().build().await.unwrap_err();
        assert!(matches!(err, TrawlError::MissingBaseUrl));
    }

    #[tokio::test]
    async fn test_during_retrieves_the_whole_range() {
        let start = ts("2021-12-01T00:00:00Z");
        let mock = Arc::new(MockExchange::uniform(start, 35, TimeDelta::minutes(1)));
        let trawler = trawler(Arc::clone(&mock)).await;
        let range = TimeRange::new(start, start + TimeDelta::days(1)).unwrap();

        let dataset = trawler.during("rs.test/sensors/aqm-1", range).await.unwrap();
        assert_eq!(dataset.len(), 35);
        assert!(dataset.is_complete());
    }

    #[tokio::test]
    async fn test_during_propagates_unauthorized() {
        let start = ts("2021-12-01T00:00:00Z");
        let mock = Arc::new(
            MockExchange::uniform(start, 5, TimeDelta::minutes(1)).with_unauthorized_at([0]),
        );
        let trawler = trawler(mock).await;
        let range = TimeRange::new(start, start + TimeDelta::days(1)).unwrap();

        let err = trawler
            .during("rs.test/sensors/aqm-1", range)
            .await
            .unwrap_err();
        assert!(matches!(err, TrawlError::Unauthorized));
    }

    #[tokio::test]
    async fn test_latest_returns_the_current_value() {
        let start = ts("2021-12-01T00:00:00Z");
        let mock = Arc::new(MockExchange::uniform(start, 12, TimeDelta::minutes(1)));
        let trawler = trawler(Arc::clone(&mock)).await;

        let records = trawler.latest("rs.test/sensors/aqm-1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].observation_time(),
            Some(start + TimeDelta::minutes(11))
        );
    }

    struct GroupResolver;

    #[async_trait]
    impl Resolver for GroupResolver {
        async fn lookup(&self, entity_id: &str) -> Result<EntityDescriptor, ResolveError> {
            Ok(EntityDescriptor {
                entity_id: entity_id.to_string(),
                resources: vec![
                    format!("{entity_id}/unit-1"),
                    format!("{entity_id}/unit-2"),
                ],
            })
        }
    }

    #[tokio::test]
    async fn test_latest_merges_all_resolved_resources() {
        let start = ts("2021-12-01T00:00:00Z");
        let mock = Arc::new(MockExchange::uniform(start, 6, TimeDelta::minutes(1)));
        let trawler = Trawler::builder()
            .base_url("https://rs.test/ngsi-ld/v1")
            .transport(Arc::clone(&mock) as Arc<dyn Transport>)
            .resolver(Arc::new(GroupResolver))
            .build()
            .await
            .unwrap();

        let records = trawler.latest("rs.test/sensors/aqm").await.unwrap();
        // One latest record per resolved resource.
        assert_eq!(records.len(), 2);
        assert_eq!(mock.served(), 2);
    }

    #[tokio::test]
    async fn test_token_is_materialized_as_a_bearer_header() {
        let start = ts("2021-12-01T00:00:00Z");
        let mock = Arc::new(MockExchange::uniform(start, 3, TimeDelta::minutes(1)));
        let trawler = Trawler::builder()
            .base_url("https://rs.test/ngsi-ld/v1")
            .token("secret-token")
            .transport(Arc::clone(&mock) as Arc<dyn Transport>)
            .build()
            .await
            .unwrap();

        let range = TimeRange::new(start, start + TimeDelta::days(1)).unwrap();
        trawler
            .during("rs.test/sensors/aqm-1", range)
            .await
            .unwrap();
        assert_eq!(
            mock.seen_authorization().as_deref(),
            Some("Bearer secret-token")
        );
    }
}
