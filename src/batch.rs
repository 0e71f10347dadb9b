//! Batch pipeline: enumerate tasks, fetch them concurrently with
//! checkpoints, then deduplicate and upsert the accumulated records.

pub mod accumulator;
pub mod dispatcher;
pub mod enumerator;
pub mod fetcher;
pub mod upserter;

pub use accumulator::RecordAccumulator;
pub use dispatcher::{DispatchConfig, DispatchSummary, Dispatcher};
pub use enumerator::TaskEnumerator;
pub use fetcher::{Fetcher, Page, PageSource, PaginatedFetcher, RateLimitedFetcher, paginate};
pub use upserter::{TieBreak, UpsertSummary, Upserter, dedup};
