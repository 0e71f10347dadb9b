//! Fetcher contract, the minimum-delay wrapper and offset pagination.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{Record, Task};
use crate::errors::EtlError;

/// Turns one task into the records it yields.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, task: &Task) -> Result<Vec<Record>, EtlError>;
}

/// One page of vendor rows plus the total row count when the vendor reports it.
#[derive(Debug, Default)]
pub struct Page {
    pub rows: Vec<Record>,
    pub total: Option<u64>,
}

/// Source of offset/limit pages for a task.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, task: &Task, offset: usize, limit: usize)
    -> Result<Page, EtlError>;
}

/// Requests pages until the cumulative row count reaches the reported total or
/// a page comes back empty. Without a total, a short page ends the walk.
/// `delay` is slept between page requests.
pub async fn paginate<S>(
    source: &S,
    task: &Task,
    page_size: usize,
    delay: Duration,
) -> Result<Vec<Record>, EtlError>
where
    S: PageSource + ?Sized,
{
    let page_size = page_size.max(1);
    let mut rows = Vec::new();
    let mut offset = 0usize;

    loop {
        if offset > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let page = source.fetch_page(task, offset, page_size).await?;
        let received = page.rows.len();
        rows.extend(page.rows);

        if received == 0 {
            break;
        }
        offset += received;

        let done = match page.total {
            Some(total) => offset as u64 >= total,
            None => received < page_size,
        };
        if done {
            break;
        }
        debug!("{}: {} rows so far, continuing at offset {}", task, offset, offset);
    }

    Ok(rows)
}

/// Fetcher over a `PageSource`.
pub struct PaginatedFetcher<S> {
    source: S,
    page_size: usize,
    delay: Duration,
}

impl<S: PageSource> PaginatedFetcher<S> {
    pub fn new(source: S, page_size: usize, delay: Duration) -> Self {
        Self {
            source,
            page_size,
            delay,
        }
    }
}

#[async_trait]
impl<S: PageSource> Fetcher for PaginatedFetcher<S> {
    async fn fetch(&self, task: &Task) -> Result<Vec<Record>, EtlError> {
        paginate(&self.source, task, self.page_size, self.delay).await
    }
}

/// Sleeps a fixed minimum delay before every delegated fetch.
pub struct RateLimitedFetcher<F> {
    inner: F,
    delay: Duration,
}

impl<F: Fetcher> RateLimitedFetcher<F> {
    pub fn new(inner: F, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for RateLimitedFetcher<F> {
    async fn fetch(&self, task: &Task) -> Result<Vec<Record>, EtlError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.fetch(task).await
    }
}
