//! Wires the pure date-range arithmetic to a [`RangeLockStore`], giving
//! callers a single `plan` step that reports which sub-ranges of a
//! requested window are actually free to crawl, and locks exactly those.
//!
//! Grounded on `kernel/jobs/job_store.rs`'s claim/heartbeat/release idiom:
//! acquire is a compare-and-set, and a worker that finishes (or dies) is
//! responsible for releasing what it claimed.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use super::date_range::{merge, overlaps_within, subtract, DateRange};
use super::store::{RangeLockStore, LOCK_NAMESPACE};
use crate::error::Result;

/// The plan produced for a single `(keyword, window)` crawl request: the
/// sub-ranges that were successfully locked (safe for the caller to
/// crawl) and the set of keys to release when crawling of each
/// sub-range completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPlan {
    pub keyword: String,
    pub free_ranges: Vec<DateRange>,
}

impl LockPlan {
    pub fn is_empty(&self) -> bool {
        self.free_ranges.is_empty()
    }
}

fn lock_key(keyword: &str, range: &DateRange) -> String {
    format!("{LOCK_NAMESPACE}{keyword}:{}:{}", range.start, range.end)
}

pub struct CrawlLockManager {
    store: Arc<dyn RangeLockStore>,
    ttl: Duration,
}

impl CrawlLockManager {
    pub fn new(store: Arc<dyn RangeLockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Discover which currently-locked sub-ranges overlap `request` for
    /// `keyword`, without taking any new locks.
    pub async fn locked_overlaps(
        &self,
        keyword: &str,
        request: &DateRange,
    ) -> Result<Vec<DateRange>> {
        let prefix = format!("{LOCK_NAMESPACE}{keyword}:");
        let keys = self.store.scan(&prefix).await?;
        let locked: Vec<DateRange> = keys
            .iter()
            .filter_map(|k| parse_locked_range(k, &prefix))
            .collect();
        let merged = merge(&locked);
        Ok(overlaps_within(&merged, request)
            .into_iter()
            .map(|o| o.as_range())
            .collect())
    }

    /// Compute the free sub-ranges of `request` for `keyword` and attempt
    /// to lock each of them. Sub-ranges that lose the acquire race (raced
    /// by another worker between `scan` and `acquire`) are dropped from
    /// the returned plan; the caller only ever crawls what it actually
    /// locked.
    pub async fn plan_and_lock(&self, keyword: &str, request: &DateRange) -> Result<LockPlan> {
        let locked_overlaps = self.locked_overlaps(keyword, request).await?;
        let overlaps = locked_overlaps
            .iter()
            .map(|r| super::date_range::Overlap {
                from: r.start,
                to: r.end,
            })
            .collect::<Vec<_>>();
        let free = subtract(request, &overlaps);

        let mut acquired = Vec::with_capacity(free.len());
        for range in free {
            let key = lock_key(keyword, &range);
            if self.store.acquire(&key, self.ttl).await? {
                acquired.push(range);
            }
        }

        Ok(LockPlan {
            keyword: keyword.to_string(),
            free_ranges: acquired,
        })
    }

    /// Release the lock held for a single sub-range, e.g. after its
    /// results have been persisted (or after a job-fatal error aborts
    /// the remainder of the plan).
    pub async fn release(&self, keyword: &str, range: &DateRange) -> Result<bool> {
        let key = lock_key(keyword, range);
        self.store.release(&key).await
    }

    /// Release every lock held for `keyword`, e.g. on worker crash
    /// recovery or job cancellation.
    pub async fn release_all(&self, keyword: &str) -> Result<usize> {
        let prefix = format!("{LOCK_NAMESPACE}{keyword}:");
        self.store.release_all(&prefix).await
    }
}

fn parse_locked_range(key: &str, prefix: &str) -> Option<DateRange> {
    let rest = key.strip_prefix(prefix)?;
    let mut parts = rest.splitn(2, ':');
    let start = parts.next()?;
    let end = parts.next()?;
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?;
    Some(DateRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::locking::store::InMemoryRangeLockStore;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn r(s: &str, e: &str) -> DateRange {
        DateRange::new(d(s), d(e))
    }

    fn manager() -> CrawlLockManager {
        CrawlLockManager::new(Arc::new(InMemoryRangeLockStore::new()), Duration::from_secs(6000))
    }

    #[tokio::test]
    async fn empty_store_locks_whole_request() {
        let mgr = manager();
        let plan = mgr.plan_and_lock("rust", &r("2024-01-01", "2024-01-10")).await.unwrap();
        assert_eq!(plan.free_ranges, vec![r("2024-01-01", "2024-01-10")]);
    }

    #[tokio::test]
    async fn second_identical_request_finds_nothing_free() {
        let mgr = manager();
        let req = r("2024-01-01", "2024-01-10");
        mgr.plan_and_lock("rust", &req).await.unwrap();
        let plan = mgr.plan_and_lock("rust", &req).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn hole_between_two_locked_sub_ranges_is_planned() {
        let mgr = manager();
        mgr.plan_and_lock("rust", &r("2024-01-01", "2024-01-03")).await.unwrap();
        mgr.plan_and_lock("rust", &r("2024-01-07", "2024-01-10")).await.unwrap();
        let plan = mgr.plan_and_lock("rust", &r("2024-01-01", "2024-01-10")).await.unwrap();
        assert_eq!(plan.free_ranges, vec![r("2024-01-04", "2024-01-06")]);
    }

    #[tokio::test]
    async fn different_keywords_do_not_interfere() {
        let mgr = manager();
        mgr.plan_and_lock("rust", &r("2024-01-01", "2024-01-10")).await.unwrap();
        let plan = mgr.plan_and_lock("golang", &r("2024-01-01", "2024-01-10")).await.unwrap();
        assert_eq!(plan.free_ranges, vec![r("2024-01-01", "2024-01-10")]);
    }

    #[tokio::test]
    async fn release_then_replan_reclaims_range() {
        let mgr = manager();
        let req = r("2024-01-01", "2024-01-10");
        mgr.plan_and_lock("rust", &req).await.unwrap();
        assert!(mgr.release("rust", &req).await.unwrap());
        let plan = mgr.plan_and_lock("rust", &req).await.unwrap();
        assert_eq!(plan.free_ranges, vec![req]);
    }

    #[tokio::test]
    async fn release_all_clears_every_sub_range() {
        let mgr = manager();
        mgr.plan_and_lock("rust", &r("2024-01-01", "2024-01-03")).await.unwrap();
        mgr.plan_and_lock("rust", &r("2024-01-07", "2024-01-10")).await.unwrap();
        let released = mgr.release_all("rust").await.unwrap();
        assert_eq!(released, 2);
        let plan = mgr.plan_and_lock("rust", &r("2024-01-01", "2024-01-10")).await.unwrap();
        assert_eq!(plan.free_ranges, vec![r("2024-01-01", "2024-01-10")]);
    }
}
