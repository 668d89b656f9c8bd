pub mod crawl;
pub mod db_worker;
pub mod job;
pub mod worker;

pub use crawl::{Crawl, CrawledItem, FakeCrawl};
pub use db_worker::{DbRequest, DbResponse, DbWorker};
pub use job::{Job, JobState};
pub use worker::{CrawlWorker, CrawlWorkerConfig, JobOutcome};
