//! Per-worker liveness tracking for the supervisor's restart policy.
//!
//! Grounded on `kernel/jobs/worker.rs`'s heartbeat task, which updates a
//! lease on a fixed interval via `tokio::time::interval` while the main
//! poll loop runs concurrently. Here the heartbeat is purely in-memory:
//! a worker task pings its `WorkerHealth` slot, and the supervisor's
//! monitor loop restarts any worker whose last heartbeat is older than
//! `staleness`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub last_heartbeat: Instant,
    pub restarts: u32,
}

/// Shared liveness table, keyed by worker id (`"CrawlWorker-0"`, etc).
#[derive(Default)]
pub struct WorkerHealth {
    inner: RwLock<HashMap<String, WorkerStatus>>,
}

impl WorkerHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, worker_id: &str) {
        self.inner.write().await.insert(
            worker_id.to_string(),
            WorkerStatus {
                state: WorkerState::Starting,
                last_heartbeat: Instant::now(),
                restarts: 0,
            },
        );
    }

    pub async fn heartbeat(&self, worker_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(status) = inner.get_mut(worker_id) {
            status.state = WorkerState::Running;
            status.last_heartbeat = Instant::now();
        }
    }

    pub async fn mark_stopped(&self, worker_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(status) = inner.get_mut(worker_id) {
            status.state = WorkerState::Stopped;
        }
    }

    pub async fn record_restart(&self, worker_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(status) = inner.get_mut(worker_id) {
            status.restarts += 1;
            status.state = WorkerState::Starting;
            status.last_heartbeat = Instant::now();
        }
    }

    /// Worker ids whose last heartbeat is older than `staleness`, i.e.
    /// candidates for restart.
    pub async fn stale_workers(&self, staleness: Duration) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .iter()
            .filter(|(_, status)| {
                status.state != WorkerState::Stopped && status.last_heartbeat.elapsed() > staleness
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn status_of(&self, worker_id: &str) -> Option<WorkerStatus> {
        self.inner.read().await.get(worker_id).cloned()
    }
}

pub type SharedWorkerHealth = Arc<WorkerHealth>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_heartbeat_marks_running() {
        let health = WorkerHealth::new();
        health.register("CrawlWorker-0").await;
        health.heartbeat("CrawlWorker-0").await;
        let status = health.status_of("CrawlWorker-0").await.unwrap();
        assert_eq!(status.state, WorkerState::Running);
    }

    #[tokio::test]
    async fn stale_worker_detected_after_timeout() {
        let health = WorkerHealth::new();
        health.register("CrawlWorker-0").await;
        health.heartbeat("CrawlWorker-0").await;
        assert!(health.stale_workers(Duration::from_secs(3600)).await.is_empty());
        assert_eq!(
            health.stale_workers(Duration::from_secs(0)).await,
            vec!["CrawlWorker-0".to_string()]
        );
    }

    #[tokio::test]
    async fn stopped_worker_is_never_stale() {
        let health = WorkerHealth::new();
        health.register("CrawlWorker-0").await;
        health.mark_stopped("CrawlWorker-0").await;
        assert!(health.stale_workers(Duration::from_secs(0)).await.is_empty());
    }

    #[tokio::test]
    async fn record_restart_increments_counter_and_resets_state() {
        let health = WorkerHealth::new();
        health.register("CrawlWorker-0").await;
        health.mark_stopped("CrawlWorker-0").await;
        health.record_restart("CrawlWorker-0").await;
        let status = health.status_of("CrawlWorker-0").await.unwrap();
        assert_eq!(status.restarts, 1);
        assert_eq!(status.state, WorkerState::Starting);
    }
}
