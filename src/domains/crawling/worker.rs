//! The crawl worker state machine:
//!
//! ```text
//! RECEIVED -> PLANNING -> (for each residual) LOCKING -> CRAWLING -> PERSISTING -> NEXT
//!                                                      \-> ERROR -> RELEASE -> NEXT
//!   queue empty -> COMPLETED
//! ```
//!
//! Grounded on `kernel/jobs/worker.rs`'s `process_job` + heartbeat loop:
//! here `process_request` plays the role of `process_job`. DBWorker is a
//! peer worker class reached through [`crate::kernel::MessageBus::request`],
//! not a directly-held store handle, matching the supervisor's
//! envelope-routing model.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexBuilder;
use tracing::{info, warn};

use crate::domains::broker::{publish_json, BrokerGateway, CompensationNotice, CrawlRequest, DataGatheredNotice};
use crate::domains::locking::{CrawlLockManager, DateRange};
use crate::domains::results::{keyword_regex, CrawledRecord};
use crate::error::{GatheringError, Result};
use crate::kernel::envelope::{Envelope, RoutePath, Status, DB_WORKER};
use crate::kernel::supervisor::{Service, WorkerContext};
use crate::kernel::MessageBus;

use super::crawl::Crawl;
use super::db_worker::{DbRequest, DbResponse};
use super::job::{Job, JobState};

const DB_WORKER_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CrawlWorkerConfig {
    pub data_gathering_subject: String,
    pub compensation_subject: String,
}

/// Outcome of processing one job to completion or fatal failure.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: uuid::Uuid,
    pub completed_ranges: Vec<DateRange>,
    pub total_records: u64,
}

pub struct CrawlWorker {
    lock_manager: Arc<CrawlLockManager>,
    crawler: Arc<dyn Crawl>,
    broker: Arc<dyn BrokerGateway>,
    config: CrawlWorkerConfig,
}

impl CrawlWorker {
    pub fn new(
        lock_manager: Arc<CrawlLockManager>,
        crawler: Arc<dyn Crawl>,
        broker: Arc<dyn BrokerGateway>,
        config: CrawlWorkerConfig,
    ) -> Self {
        Self { lock_manager, crawler, broker, config }
    }

    async fn db_request(&self, bus: &Arc<MessageBus>, request: DbRequest) -> Result<DbResponse> {
        let route = match &request {
            DbRequest::CreateNewData { project_id, .. } => {
                RoutePath::with_param(DB_WORKER, "create_new_data", project_id.to_string())
            }
            DbRequest::GetCrawledData { .. } => RoutePath::with_method(DB_WORKER, "get_crawled_data"),
        };
        let envelope = Envelope::new(vec![route], Status::Received, serde_json::to_value(&request).unwrap());
        let reply = bus.request(envelope, DB_WORKER_TIMEOUT).await?;
        if reply.status == Status::Failed {
            let reason = reply.reason.unwrap_or_else(|| "DBWorker failed".to_string());
            return Err(if reason == "SERVER_BUSY" {
                GatheringError::ServerBusy
            } else {
                GatheringError::Transport(reason)
            });
        }
        serde_json::from_value(reply.payload).map_err(|e| GatheringError::Transport(e.to_string()))
    }

    /// Drive one `CrawlRequest` through the full state machine.
    ///
    /// A sub-range that fails with a recoverable error is skipped (its
    /// lock is released so another worker can retry it later); a
    /// job-fatal error aborts the whole request, releasing every lock
    /// the job still holds and publishing a compensation notice.
    pub async fn process_request(&self, bus: &Arc<MessageBus>, request: CrawlRequest) -> Result<JobOutcome> {
        let window = DateRange::from_timestamps(request.from, request.to);
        let mut job = Job::new(request.project_id, request.keyword.clone(), window);
        job.state = JobState::Planning;

        // Ingest coverage: ask DBWorker what's already persisted for this
        // keyword/window, and short-circuit if it exactly matches.
        let coverage = self
            .db_request(bus, DbRequest::GetCrawledData { keyword: job.keyword.clone(), start: window.start, end: window.end })
            .await?
            .into_records()?;
        let covered = coverage_range(&coverage);

        if covered == Some(window) {
            info!(keyword = %job.keyword, %window, "window already fully covered, short-circuiting");
            self.publish_gathered(&job, window, 0).await?;
            job.state = JobState::Completed;
            return Ok(JobOutcome { job_id: job.id, completed_ranges: vec![], total_records: 0 });
        }

        let mut locked_overlaps = self.lock_manager.locked_overlaps(&job.keyword, &window).await?;
        if let Some(covered) = covered {
            locked_overlaps.push(covered);
        }
        let overlaps: Vec<crate::domains::locking::Overlap> = locked_overlaps
            .iter()
            .map(|r| crate::domains::locking::Overlap { from: r.start, to: r.end })
            .collect();
        let residuals = crate::domains::locking::subtract(&window, &overlaps);

        job.state = JobState::Locking;
        job.remaining = residuals;

        let matcher = RegexBuilder::new(&keyword_regex(&job.keyword))
            .case_insensitive(true)
            .build()
            .map_err(|e| GatheringError::BadInput(e.to_string()))?;

        let mut accumulator: Vec<CrawledRecord> = Vec::new();

        while let Some(range) = job.remaining.first().copied() {
            let key_acquired = self.lock_manager.plan_and_lock(&job.keyword, &range).await?;
            if key_acquired.is_empty() {
                // Another worker owns this sub-range; skip it.
                job.remaining.remove(0);
                continue;
            }

            job.state = JobState::Crawling;
            let crawl_result = self.crawler.crawl(&job.keyword, range.start, range.end).await;

            let items = match crawl_result {
                Ok(items) => items,
                Err(err) if err.is_job_fatal() => {
                    self.abort_job(&job, &err.to_string()).await;
                    job.state = JobState::Failed;
                    return Err(err);
                }
                Err(err) => {
                    warn!(keyword = %job.keyword, range = %range, error = %err, "sub-range crawl failed, releasing lock for retry");
                    self.lock_manager.release(&job.keyword, &range).await?;
                    job.remaining.remove(0);
                    continue;
                }
            };

            job.state = JobState::Persisting;
            let matched: Vec<CrawledRecord> = items
                .into_iter()
                .filter(|item| matcher.is_match(&item.full_text))
                .map(|item| {
                    CrawledRecord::new(
                        job.project_id,
                        job.keyword.clone(),
                        item.source_url,
                        item.full_text,
                        item.day.and_hms_opt(0, 0, 0).unwrap().and_utc(),
                    )
                })
                .collect();

            // Release regardless of crawl outcome, including empty results.
            self.lock_manager.release(&job.keyword, &range).await?;
            accumulator.extend(matched);
            job.completed.push(range);
            job.remaining.remove(0);
        }

        let inserted = self
            .db_request(bus, DbRequest::CreateNewData { project_id: job.project_id, data: accumulator.clone() })
            .await?
            .into_inserted_count()?;

        job.state = JobState::Completed;
        info!(job_id = %job.id, keyword = %job.keyword, records = inserted, "job completed");
        self.publish_gathered(&job, window, inserted as u64).await?;

        Ok(JobOutcome {
            job_id: job.id,
            completed_ranges: job.completed,
            total_records: inserted as u64,
        })
    }

    async fn publish_gathered(&self, job: &Job, window: DateRange, record_count: u64) -> Result<()> {
        let notice = DataGatheredNotice {
            project_id: job.project_id,
            keyword: job.keyword.clone(),
            from: window.start.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            to: window.end.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            record_count,
        };
        publish_json(&*self.broker, &self.config.data_gathering_subject, &notice).await
    }

    async fn abort_job(&self, job: &Job, reason: &str) {
        if let Err(err) = self.lock_manager.release_all(&job.keyword).await {
            warn!(keyword = %job.keyword, error = %err, "failed to release locks during job abort");
        }
        let notice = CompensationNotice {
            project_id: job.project_id,
            keyword: job.keyword.clone(),
            from: job.requested_window.start.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            to: job.requested_window.end.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            reason: reason.to_string(),
        };
        if let Err(err) = publish_json(&*self.broker, &self.config.compensation_subject, &notice).await {
            warn!(keyword = %job.keyword, error = %err, "failed to publish compensation notice");
        }
    }
}

/// The `[min(created_at), max(created_at)]` span of already-persisted
/// records, or `None` if there are none.
fn coverage_range(records: &[CrawledRecord]) -> Option<DateRange> {
    let mut days = records.iter().map(|r| r.created_at.date_naive());
    let first = days.next()?;
    let (min, max) = days.fold((first, first), |(min, max), d| (min.min(d), max.max(d)));
    Some(DateRange::new(min, max))
}

#[async_trait]
impl Service for CrawlWorker {
    fn name(&self) -> &str {
        "CrawlWorker"
    }

    async fn run(self: Box<Self>, mut ctx: WorkerContext) -> Result<()> {
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => return Ok(()),
                maybe_envelope = ctx.inbox.recv() => {
                    let Some(envelope) = maybe_envelope else { return Ok(()) };

                    if ctx.busy.swap(true, Ordering::SeqCst) {
                        ctx.bus.respond(envelope.failed("SERVER_BUSY")).await;
                        continue;
                    }

                    let request: CrawlRequest = match serde_json::from_value(envelope.payload.clone()) {
                        Ok(request) => request,
                        Err(err) => {
                            ctx.busy.store(false, Ordering::SeqCst);
                            ctx.bus.respond(envelope.failed(format!("bad payload: {err}"))).await;
                            continue;
                        }
                    };

                    let reply = match self.process_request(&ctx.bus, request).await {
                        Ok(outcome) => envelope.reply(
                            Status::Completed,
                            serde_json::json!({
                                "job_id": outcome.job_id,
                                "total_records": outcome.total_records,
                                "completed_ranges": outcome.completed_ranges.len(),
                            }),
                        ),
                        Err(err) => envelope.failed(err.to_string()),
                    };
                    ctx.busy.store(false, Ordering::SeqCst);
                    ctx.bus.respond(reply).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::broker::TestBroker;
    use crate::domains::crawling::crawl::{CrawledItem, FakeCrawl};
    use crate::domains::crawling::db_worker::DbWorker;
    use crate::domains::locking::InMemoryRangeLockStore;
    use crate::domains::results::InMemoryResultsStore;
    use crate::domains::results::ResultsStore;
    use crate::kernel::envelope::DB_WORKER;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    async fn harness(
        crawler: Arc<dyn Crawl>,
    ) -> (CrawlWorker, Arc<MessageBus>, Arc<InMemoryResultsStore>, Arc<TestBroker>) {
        let lock_manager = Arc::new(CrawlLockManager::new(
            Arc::new(InMemoryRangeLockStore::new()),
            Duration::from_secs(6000),
        ));
        let results_store = Arc::new(InMemoryResultsStore::new());
        let broker = Arc::new(TestBroker::new());
        let bus = Arc::new(MessageBus::new());

        let (db_inbox, db_busy) = bus.register_worker(DB_WORKER, "DBWorker-0").await;
        let db_worker = Box::new(DbWorker::new(results_store.clone() as Arc<dyn ResultsStore>));
        let shutdown = tokio_util::sync::CancellationToken::new();
        let db_ctx = WorkerContext {
            worker_id: "DBWorker-0".to_string(),
            inbox: db_inbox,
            bus: bus.clone(),
            shutdown,
            busy: db_busy,
        };
        tokio::spawn(async move {
            let _ = db_worker.run(db_ctx).await;
        });

        let worker = CrawlWorker::new(
            lock_manager,
            crawler,
            broker.clone(),
            CrawlWorkerConfig {
                data_gathering_subject: "data_gathering_queue".to_string(),
                compensation_subject: "compensation_queue".to_string(),
            },
        );
        (worker, bus, results_store, broker)
    }

    #[tokio::test]
    async fn successful_job_persists_records_and_publishes_notice() {
        let items = vec![CrawledItem {
            source_url: "https://example.com/1".to_string(),
            full_text: "hello rust".to_string(),
            day: chrono::NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        }];
        let (worker, bus, results_store, broker) = harness(Arc::new(FakeCrawl::with_items(items))).await;

        let request = CrawlRequest {
            project_id: Uuid::new_v4(),
            keyword: "rust".to_string(),
            from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            request_id: None,
        };
        let outcome = worker.process_request(&bus, request).await.unwrap();

        assert_eq!(outcome.total_records, 1);
        assert_eq!(results_store.all().len(), 1);
        assert!(broker.was_published_to("data_gathering_queue").await);
    }

    #[tokio::test]
    async fn non_matching_keyword_text_is_filtered_out() {
        let items = vec![CrawledItem {
            source_url: "https://example.com/1".to_string(),
            full_text: "totally unrelated content".to_string(),
            day: chrono::NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        }];
        let (worker, bus, results_store, _broker) = harness(Arc::new(FakeCrawl::with_items(items))).await;

        let request = CrawlRequest {
            project_id: Uuid::new_v4(),
            keyword: "rust".to_string(),
            from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            request_id: None,
        };
        let outcome = worker.process_request(&bus, request).await.unwrap();

        assert_eq!(outcome.total_records, 0);
        assert!(results_store.all().is_empty());
    }

    #[tokio::test]
    async fn job_fatal_crawl_error_releases_locks_and_publishes_compensation() {
        let (worker, bus, results_store, broker) = harness(Arc::new(FakeCrawl::failing("boom"))).await;

        let request = CrawlRequest {
            project_id: Uuid::new_v4(),
            keyword: "rust".to_string(),
            from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            request_id: None,
        };
        let err = worker.process_request(&bus, request.clone()).await.unwrap_err();
        assert_eq!(err.reason(), "CRAWL_FAILED");
        assert!(results_store.all().is_empty());
        assert!(broker.was_published_to("compensation_queue").await);

        // locks were released on abort, so a retry can acquire the full window again
        let second_err = worker.process_request(&bus, request).await.unwrap_err();
        assert_eq!(second_err.reason(), "CRAWL_FAILED");
    }
}
