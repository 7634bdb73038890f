//! Client-side temporal query planner for paginated time-series exchanges.
//!
//! This library provides functionality to:
//! - Resolve a logical entity to its physical resources
//! - Plan large time-ranged retrievals against a remote that caps both page
//!   size and pagination depth (probe, paginate, bisect)
//! - Execute query batches concurrently under a bounded worker pool, with an
//!   immediate abort on credential rejection
//! - Aggregate pages into one time-ordered dataset with explicit
//!   incompleteness warnings
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────┐
//! │ Trawler  │──▶│ RangeSplitter │──▶│ aggregate │
//! │ (facade) │   │ probe→page→   │   │ (Dataset) │
//! └──────────┘   │    bisect     │   └───────────┘
//!                └───────┬───────┘
//!                        ▼
//!                ┌───────────────┐   ┌───────────────┐
//!                │ BatchExecutor │──▶│  PageFetcher  │
//!                │  (semaphore)  │   │  (Transport)  │
//!                └───────────────┘   └───────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use timetrawl::{TimeRange, Trawler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let trawler = Trawler::builder()
//!         .base_url("https://rs.cos.example.org/ngsi-ld/v1")
//!         .token("access-token")
//!         .build()
//!         .await?;
//!
//!     let range = TimeRange::new(
//!         "2021-12-01T00:00:00Z".parse()?,
//!         "2021-12-11T00:00:00Z".parse()?,
//!     )?;
//!     let dataset = trawler
//!         .during("rs.example.org/aqm/sensor-1", range)
//!         .await?;
//!
//!     println!("{} records, complete: {}", dataset.len(), dataset.is_complete());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod auth;
pub mod batch;
pub mod catalogue;
pub mod export;
pub mod fetcher;
pub mod query;
pub mod splitter;
pub mod transport;
pub mod trawler;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use aggregate::{aggregate, Dataset, RangeWarning, WarningKind};
pub use auth::{StaticToken, TokenProvider};
pub use batch::BatchExecutor;
pub use catalogue::{DirectResolver, EntityDescriptor, Resolver};
pub use export::{ExportError, ExportFormat};
pub use fetcher::PageFetcher;
pub use query::{GeoFilter, PropertyFilter, Query, QueryError, TimeRange};
pub use splitter::{Leaf, RangeSplitter, SplitterConfig};
pub use transport::{HttpTransport, Transport};
pub use trawler::{TrawlError, Trawler, TrawlerBuilder};
pub use types::{Page, PageStatus, Record};
