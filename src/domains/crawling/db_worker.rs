//! Persistence and query worker, reached by [`super::worker::CrawlWorker`]
//! over [`crate::kernel::MessageBus::request`] rather than a direct
//! store handle — grounded on the supervisor's busy/reroute policy in
//! §4.6 of the design notes: a worker that is mid-request rejects
//! further work with `SERVER_BUSY` instead of queuing it internally.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domains::results::{CrawledRecord, ResultsStore};
use crate::error::{GatheringError, Result};
use crate::kernel::envelope::Status;
use crate::kernel::supervisor::{Service, WorkerContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DbRequest {
    CreateNewData { project_id: uuid::Uuid, data: Vec<CrawledRecord> },
    GetCrawledData { keyword: String, start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DbResponse {
    CreateNewData { inserted: usize },
    GetCrawledData { records: Vec<CrawledRecord> },
}

pub struct DbWorker {
    results_store: Arc<dyn ResultsStore>,
}

impl DbWorker {
    pub fn new(results_store: Arc<dyn ResultsStore>) -> Self {
        Self { results_store }
    }

    async fn handle(results_store: &Arc<dyn ResultsStore>, request: DbRequest) -> Result<DbResponse> {
        match request {
            DbRequest::CreateNewData { data, .. } => {
                if data.is_empty() {
                    return Ok(DbResponse::CreateNewData { inserted: 0 });
                }
                let inserted = data.len();
                results_store.insert_batch(&data).await?;
                Ok(DbResponse::CreateNewData { inserted })
            }
            DbRequest::GetCrawledData { keyword, start, end } => {
                let records = results_store.list_for_keyword_range(&keyword, start, end).await?;
                Ok(DbResponse::GetCrawledData { records })
            }
        }
    }
}

#[async_trait]
impl Service for DbWorker {
    fn name(&self) -> &str {
        "DBWorker"
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

                    let request: DbRequest = match serde_json::from_value(envelope.payload.clone()) {
                        Ok(request) => request,
                        Err(err) => {
                            ctx.busy.store(false, Ordering::SeqCst);
                            ctx.bus.respond(envelope.failed(format!("bad payload: {err}"))).await;
                            continue;
                        }
                    };

                    let reply = match Self::handle(&self.results_store, request).await {
                        Ok(response) => envelope.reply(Status::Completed, serde_json::to_value(response).unwrap()),
                        Err(err) => {
                            warn!(error = %err, "DBWorker request failed");
                            envelope.failed(err.to_string())
                        }
                    };
                    ctx.busy.store(false, Ordering::SeqCst);
                    ctx.bus.respond(reply).await;
                }
            }
        }
    }
}

impl DbResponse {
    pub fn into_records(self) -> Result<Vec<CrawledRecord>> {
        match self {
            DbResponse::GetCrawledData { records } => Ok(records),
            DbResponse::CreateNewData { .. } => Err(GatheringError::BadInput(
                "expected get_crawled_data response".to_string(),
            )),
        }
    }

    pub fn into_inserted_count(self) -> Result<usize> {
        match self {
            DbResponse::CreateNewData { inserted } => Ok(inserted),
            DbResponse::GetCrawledData { .. } => Err(GatheringError::BadInput(
                "expected create_new_data response".to_string(),
            )),
        }
    }
}
