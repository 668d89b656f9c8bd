//! The opaque crawling capability a [`super::worker::CrawlWorker`]
//! depends on, kept separate from HTTP/fetch/parse concerns exactly as
//! the reference's `intelligent_crawler::traits::PageFetcher` and
//! `PageEvaluator` are kept separate from storage and rate limiting.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;

/// A single unit of crawled content for one calendar day within a
/// keyword's date range.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawledItem {
    pub source_url: String,
    pub full_text: String,
    pub day: NaiveDate,
}

/// Fetches crawled content for a keyword over a date range. Swappable
/// for a fake in tests; the production implementation is outside this
/// crate's scope (an HTTP client + parser pipeline), matching how
/// `PageFetcher`/`PageEvaluator` are implemented downstream of the
/// reference's `traits.rs`.
#[async_trait]
pub trait Crawl: Send + Sync {
    async fn crawl(&self, keyword: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<CrawledItem>>;
}

/// An in-memory fake for tests: returns a fixed set of items, filtered
/// to the requested range, or a configured error.
pub struct FakeCrawl {
    items: Vec<CrawledItem>,
    fail_with: Option<String>,
}

impl FakeCrawl {
    pub fn with_items(items: Vec<CrawledItem>) -> Self {
        Self { items, fail_with: None }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            fail_with: Some(reason.into()),
        }
    }
}

#[async_trait]
impl Crawl for FakeCrawl {
    async fn crawl(&self, _keyword: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<CrawledItem>> {
        if let Some(reason) = &self.fail_with {
            return Err(crate::error::GatheringError::CrawlFailed(reason.clone()));
        }
        Ok(self
            .items
            .iter()
            .filter(|item| item.day >= start && item.day <= end)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn fake_crawl_filters_to_requested_range() {
        let crawler = FakeCrawl::with_items(vec![
            CrawledItem { source_url: "a".into(), full_text: "x".into(), day: d("2024-01-01") },
            CrawledItem { source_url: "b".into(), full_text: "y".into(), day: d("2024-02-01") },
        ]);
        let items = crawler.crawl("rust", d("2024-01-01"), d("2024-01-31")).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_url, "a");
    }

    #[tokio::test]
    async fn failing_fake_crawl_returns_crawl_failed_error() {
        let crawler = FakeCrawl::failing("timeout");
        let err = crawler.crawl("rust", d("2024-01-01"), d("2024-01-02")).await.unwrap_err();
        assert_eq!(err.reason(), "CRAWL_FAILED");
    }
}
