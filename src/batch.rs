//! Bounded concurrent execution of independent queries.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::fetcher::PageFetcher;
use crate::query::{Query, QueryError};
use crate::types::{Page, PageStatus};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("remote rejected credentials")]
    Unauthorized,
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),
    #[error("worker pool closed")]
    PoolClosed,
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Temporal,
    Latest,
}

/// Runs batches of independent queries with bounded parallelism.
///
/// Clones share one semaphore, so every request issued anywhere in a plan
/// (probes, tail pages, both halves of a bisection) competes for the same
/// worker permits.
///
/// Output order always matches input order, regardless of completion order.
/// Failures are asymmetric: an `Unauthorized` page fails the whole batch at
/// once and cancels everything still in flight, while any other per-item
/// failure stays an `OtherError` page in its slot and its siblings run to
/// completion.
#[derive(Clone)]
pub struct BatchExecutor {
    permits: Arc<Semaphore>,
}

impl BatchExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// One worker per available core.
    pub fn with_default_workers() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(workers)
    }

    /// Execute temporal queries concurrently, returning one page per query
    /// in input order.
    pub async fn run_all(
        &self,
        fetcher: &PageFetcher,
        queries: &[Query],
    ) -> Result<Vec<Page>, BatchError> {
        self.dispatch(fetcher, queries, Endpoint::Temporal).await
    }

    /// Latest-value twin of [`run_all`](Self::run_all).
    pub async fn run_latest(
        &self,
        fetcher: &PageFetcher,
        queries: &[Query],
    ) -> Result<Vec<Page>, BatchError> {
        self.dispatch(fetcher, queries, Endpoint::Latest).await
    }

    async fn dispatch(
        &self,
        fetcher: &PageFetcher,
        queries: &[Query],
        endpoint: Endpoint,
    ) -> Result<Vec<Page>, BatchError> {
        let mut in_flight = FuturesUnordered::new();
        for (slot, query) in queries.iter().enumerate() {
            in_flight.push(async move {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| BatchError::PoolClosed)?;
                let page = match endpoint {
                    Endpoint::Temporal => fetcher.fetch(query).await?,
                    Endpoint::Latest => fetcher.fetch_latest(query).await?,
                };
                Ok::<(usize, Page), BatchError>((slot, page))
            });
        }

        // Collect in completion order so an auth failure surfaces as soon
        // as it lands; dropping `in_flight` on the error path cancels every
        // request still running or queued.
        let mut pages: Vec<Option<Page>> = queries.iter().map(|_| None).collect();
        while let Some(completed) = in_flight.next().await {
            let (slot, page) = completed?;
            if page.status == PageStatus::Unauthorized {
                tracing::warn!("batch aborted: remote rejected credentials");
                return Err(BatchError::Unauthorized);
            }
            pages[slot] = Some(page);
        }

        Ok(pages
            .into_iter()
            .map(|page| page.expect("every slot completed exactly once"))
            .collect())
    }
}
