//! Wire payloads exchanged with the external message broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound request to crawl a keyword over a date window, read off the
/// project queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlRequest {
    pub project_id: Uuid,
    pub keyword: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub request_id: Option<Uuid>,
}

/// Outbound notification that new data is available for a project,
/// published to the data-gathering queue once a sub-range's crawl and
/// persistence complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataGatheredNotice {
    pub project_id: Uuid,
    pub keyword: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub record_count: u64,
}

/// Outbound compensation notice published when a job fails fatally
/// after partially completing, so downstream consumers can unwind
/// whatever assumed the full window had been gathered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompensationNotice {
    pub project_id: Uuid,
    pub keyword: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub reason: String,
}
