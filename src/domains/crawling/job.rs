//! The unit of work a [`super::worker::CrawlWorker`] processes end to
//! end: one `(project, keyword, window)` request, broken into the
//! sub-ranges a [`crate::domains::locking::CrawlLockManager`] actually
//! managed to lock.

use uuid::Uuid;

use crate::domains::locking::DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Planning,
    Locking,
    Crawling,
    Persisting,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub keyword: String,
    pub requested_window: DateRange,
    pub state: JobState,
    /// Sub-ranges still to be crawled, in order.
    pub remaining: Vec<DateRange>,
    /// Sub-ranges successfully crawled and persisted so far.
    pub completed: Vec<DateRange>,
}

impl Job {
    pub fn new(project_id: Uuid, keyword: impl Into<String>, requested_window: DateRange) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            keyword: keyword.into(),
            requested_window,
            state: JobState::Received,
            remaining: Vec::new(),
            completed: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.remaining.is_empty()
    }
}
