//! The persisted shape of a single crawled item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single crawled document, as handed to [`super::store::ResultsStore`]
/// for persistence and later read back by downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawledRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub keyword: String,
    pub source_url: String,
    pub full_text: String,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl CrawledRecord {
    pub fn new(
        project_id: Uuid,
        keyword: impl Into<String>,
        source_url: impl Into<String>,
        full_text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            keyword: keyword.into(),
            source_url: source_url.into(),
            full_text: full_text.into(),
            created_at,
            metadata: serde_json::Value::Null,
        }
    }
}
