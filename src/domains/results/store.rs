//! Durable storage for crawled records.
//!
//! Grounded on `kernel/jobs/job_store.rs`'s `PostgresJobStore`: a small
//! async trait backed by a real `sqlx::PgPool` implementation, with an
//! in-memory fake of equal shape for tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::sync::Mutex;
use uuid::Uuid;

use super::record::CrawledRecord;
use crate::error::Result;

#[async_trait]
pub trait ResultsStore: Send + Sync {
    /// Persist a batch of crawled records for one sub-range of a job.
    async fn insert_batch(&self, records: &[CrawledRecord]) -> Result<()>;

    /// Count of already-persisted records for `keyword` within
    /// `[from, to]`, used by the planner to decide whether a sub-range
    /// that's already locked genuinely needs re-crawling.
    async fn count_for_range(&self, keyword: &str, from: NaiveDate, to: NaiveDate) -> Result<i64>;

    /// Fetch all records for a project, newest first. Used by
    /// integration tests and operational tooling, not the hot path.
    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<CrawledRecord>>;

    /// Fetch records matching `keyword` whose `created_at` falls in
    /// `[from, to]` — the `DBWorker.get_crawled_data` query contract.
    async fn list_for_keyword_range(
        &self,
        keyword: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CrawledRecord>>;
}

pub struct PostgresResultsStore {
    pool: PgPool,
}

impl PostgresResultsStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultsStore for PostgresResultsStore {
    async fn insert_batch(&self, records: &[CrawledRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO crawled_records \
                 (id, project_id, keyword, source_url, full_text, created_at, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(record.id)
            .bind(record.project_id)
            .bind(&record.keyword)
            .bind(&record.source_url)
            .bind(&record.full_text)
            .bind(record.created_at)
            .bind(&record.metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count_for_range(&self, keyword: &str, from: NaiveDate, to: NaiveDate) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM crawled_records \
             WHERE keyword = $1 AND created_at::date BETWEEN $2 AND $3",
        )
        .bind(keyword)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<CrawledRecord>> {
        let rows = sqlx::query_as::<_, PersistedRow>(
            "SELECT id, project_id, keyword, source_url, full_text, created_at, metadata \
             FROM crawled_records WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_for_keyword_range(
        &self,
        keyword: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CrawledRecord>> {
        let pattern = keyword_regex(keyword);
        let rows = sqlx::query_as::<_, PersistedRow>(
            "SELECT id, project_id, keyword, source_url, full_text, created_at, metadata \
             FROM crawled_records \
             WHERE full_text ~* $1 AND created_at::date BETWEEN $2 AND $3 \
             ORDER BY created_at ASC",
        )
        .bind(pattern)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Build the case-insensitive keyword-token regex used by both the
/// Postgres query above and [`InMemoryResultsStore`]'s filter: tokens
/// joined by `|`, matched anywhere in `full_text`.
pub fn keyword_regex(keyword: &str) -> String {
    keyword
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(sqlx::FromRow)]
struct PersistedRow {
    id: Uuid,
    project_id: Uuid,
    keyword: String,
    source_url: String,
    full_text: String,
    created_at: chrono::DateTime<chrono::Utc>,
    metadata: serde_json::Value,
}

impl From<PersistedRow> for CrawledRecord {
    fn from(row: PersistedRow) -> Self {
        CrawledRecord {
            id: row.id,
            project_id: row.project_id,
            keyword: row.keyword,
            source_url: row.source_url,
            full_text: row.full_text,
            created_at: row.created_at,
            metadata: row.metadata,
        }
    }
}

/// In-memory fake used by unit and integration tests.
#[derive(Default)]
pub struct InMemoryResultsStore {
    records: Mutex<Vec<CrawledRecord>>,
}

impl InMemoryResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<CrawledRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultsStore for InMemoryResultsStore {
    async fn insert_batch(&self, records: &[CrawledRecord]) -> Result<()> {
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }

    async fn count_for_range(&self, keyword: &str, from: NaiveDate, to: NaiveDate) -> Result<i64> {
        let records = self.records.lock().unwrap();
        let count = records
            .iter()
            .filter(|r| {
                r.keyword == keyword && {
                    let day = r.created_at.date_naive();
                    day >= from && day <= to
                }
            })
            .count();
        Ok(count as i64)
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<CrawledRecord>> {
        let mut records: Vec<CrawledRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn list_for_keyword_range(
        &self,
        keyword: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CrawledRecord>> {
        let pattern = regex::RegexBuilder::new(&keyword_regex(keyword))
            .case_insensitive(true)
            .build()
            .map_err(|e| crate::error::GatheringError::BadInput(e.to_string()))?;
        let mut records: Vec<CrawledRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                pattern.is_match(&r.full_text) && {
                    let day = r.created_at.date_naive();
                    day >= from && day <= to
                }
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
