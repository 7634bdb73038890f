//! Adaptive temporal decomposition: probe a range, page through it when the
//! remote's offset window allows, bisect the time domain when it does not.

use chrono::Duration;
use futures::future::{self, BoxFuture, FutureExt};
use thiserror::Error;

use crate::batch::{BatchError, BatchExecutor};
use crate::fetcher::PageFetcher;
use crate::query::{Query, QueryError, TimeRange};
use crate::types::{Page, PageStatus};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("remote rejected credentials")]
    Unauthorized,
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),
    #[error("worker pool closed")]
    PoolClosed,
}

impl From<BatchError> for PlanError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Unauthorized => PlanError::Unauthorized,
            BatchError::InvalidQuery(e) => PlanError::InvalidQuery(e),
            BatchError::PoolClosed => PlanError::PoolClosed,
        }
    }
}

/// Limits the remote imposes on retrieval, passed in explicitly rather than
/// read from ambient constants.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Most records the remote returns in one page.
    pub page_limit: u64,
    /// Largest total-hit count for which offset pagination stays reliable.
    /// Past this, the splitter bisects the time range instead.
    pub max_offset_hits: u64,
    /// Ranges at or below this duration are never bisected; retrieval falls
    /// back to capped pagination and the leaf is flagged dense.
    pub min_split_duration: Duration,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            page_limit: 5000,
            max_offset_hits: 50_000,
            min_split_duration: Duration::seconds(2),
        }
    }
}

/// One fully planned sub-range: every page fetched for it, in offset order.
///
/// `dense` marks a range that still exceeded the offset window when bisection
/// bottomed out; its pages cover only the window and the result is knowingly
/// incomplete.
#[derive(Debug, Clone)]
pub struct Leaf {
    pub range: TimeRange,
    pub pages: Vec<Page>,
    pub dense: bool,
}

/// Plans and executes the retrieval of a complete time-ranged result set
/// against a remote that caps both page size and pagination depth.
///
/// For each range the decision is three-way, driven by the probe's
/// `totalHits`:
///
/// 1. fits in one page (or the response is not paginated): the probe alone
///    is the leaf;
/// 2. fits in the offset window: fetch the remaining pages concurrently;
/// 3. otherwise: bisect the range and recurse on both halves in parallel,
///    since each half necessarily holds fewer hits.
///
/// Ties at either threshold take the cheaper branch. Leaves come back in
/// time order because sibling ranges are disjoint and increasing.
pub struct RangeSplitter {
    fetcher: PageFetcher,
    executor: BatchExecutor,
    config: SplitterConfig,
}

impl RangeSplitter {
    pub fn new(fetcher: PageFetcher, executor: BatchExecutor, config: SplitterConfig) -> Self {
        let mut config = config;
        // Below two seconds a bisection is not representable at wire
        // resolution, so a smaller floor would only spin.
        let floor = Duration::seconds(2);
        if config.min_split_duration < floor {
            config.min_split_duration = floor;
        }
        // A page holds at least one record and the window at least one
        // page; at zero the offset stream would never advance.
        config.page_limit = config.page_limit.max(1);
        config.max_offset_hits = config.max_offset_hits.max(config.page_limit);
        Self {
            fetcher,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Decompose `query` over its bound time range and fetch every leaf.
    ///
    /// Any offset/limit on the template is replaced by planner-owned
    /// pagination. Returns `Unauthorized` as soon as any request anywhere in
    /// the tree is rejected; per-range remote failures instead become leaves
    /// holding the error page, for the aggregator to report.
    pub async fn plan(&self, query: &Query) -> Result<Vec<Leaf>, PlanError> {
        let range = query.time_range().ok_or(QueryError::MissingTimeRange)?;
        self.plan_range(query, range).await
    }

    fn plan_range<'a>(
        &'a self,
        template: &'a Query,
        range: TimeRange,
    ) -> BoxFuture<'a, Result<Vec<Leaf>, PlanError>> {
        async move {
            let probe = self.probe(template, range).await?;
            if probe.status == PageStatus::OtherError {
                tracing::warn!(
                    "probe for {} failed ({}), branch recorded as missing",
                    range,
                    probe.title
                );
                return Ok(vec![Leaf {
                    range,
                    pages: vec![probe],
                    dense: false,
                }]);
            }

            let total_hits = match probe.total_hits {
                Some(hits) => hits,
                // No pagination metadata means the response was not
                // paginated: the probe already holds the complete answer.
                None => {
                    return Ok(vec![Leaf {
                        range,
                        pages: vec![probe],
                        dense: false,
                    }])
                }
            };

            if total_hits <= self.config.page_limit {
                return Ok(vec![Leaf {
                    range,
                    pages: vec![probe],
                    dense: false,
                }]);
            }

            if total_hits <= self.config.max_offset_hits {
                let pages = self.paginate(template, range, probe, total_hits).await?;
                return Ok(vec![Leaf {
                    range,
                    pages,
                    dense: false,
                }]);
            }

            // Offset pagination is unreliable past the window; split the
            // time domain instead, unless the range is already too short.
            let halves = if range.duration() <= self.config.min_split_duration {
                None
            } else {
                range.bisect()
            };

            match halves {
                Some((left, right)) => {
                    tracing::debug!("bisecting {} ({} hits)", range, total_hits);
                    let (mut leaves, right_leaves) = future::try_join(
                        self.plan_range(template, left),
                        self.plan_range(template, right),
                    )
                    .await?;
                    leaves.extend(right_leaves);
                    Ok(leaves)
                }
                None => {
                    tracing::warn!(
                        "{} holds {} hits but cannot split further, capping at the window",
                        range,
                        total_hits
                    );
                    let pages = self.paginate(template, range, probe, total_hits).await?;
                    Ok(vec![Leaf {
                        range,
                        pages,
                        dense: true,
                    }])
                }
            }
        }
        .boxed()
    }

    /// First page of a range, doubling as the total-hits oracle.
    async fn probe(&self, template: &Query, range: TimeRange) -> Result<Page, PlanError> {
        let query = template
            .clone()
            .with_time_range(range)
            .with_offset_limit(0, self.config.page_limit);
        let mut pages = self
            .executor
            .run_all(&self.fetcher, std::slice::from_ref(&query))
            .await?;
        Ok(pages.pop().expect("one query yields one page"))
    }

    /// Fetch the pages after the probe, concurrently, stopping at the
    /// offset window even when `total_hits` reaches past it.
    async fn paginate(
        &self,
        template: &Query,
        range: TimeRange,
        probe: Page,
        total_hits: u64,
    ) -> Result<Vec<Page>, PlanError> {
        let cap = total_hits.min(self.config.max_offset_hits);
        let tail: Vec<Query> = (1u64..)
            .map(|i| i * self.config.page_limit)
            .take_while(|offset| *offset < cap)
            .map(|offset| {
                template
                    .clone()
                    .with_time_range(range)
                    .with_offset_limit(offset, self.config.page_limit)
            })
            .collect();

        tracing::debug!(
            "paginating {} across {} pages ({} hits)",
            range,
            tail.len() + 1,
            total_hits
        );

        let mut pages = vec![probe];
        pages.extend(self.executor.run_all(&self.fetcher, &tail).await?);
        Ok(pages)
    }
}
