//! In-flight request bookkeeping for the supervisor's restart policy.
//!
//! Grounded on `kernel/jobs/worker.rs`'s `running_jobs: Arc<RwLock<HashMap<Uuid,
//! CancellationToken>>>`, redone here as envelopes grouped by the worker
//! name they were last sent to (§3) rather than a flat map, so that
//! when a worker dies the supervisor can pull exactly the entries still
//! outstanding for that class and replay them to its replacement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use super::envelope::Envelope;

struct PendingEntry {
    envelope: Envelope,
    sent_at: Instant,
}

/// Envelopes awaiting a reply, grouped by the worker name they were
/// dispatched to. Within a group, entries are kept in send order and
/// deduplicated by `envelope.id` (the message id).
#[derive(Default)]
pub struct PendingMessageTable {
    inner: RwLock<HashMap<String, Vec<PendingEntry>>>,
}

impl PendingMessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `envelope` as outstanding against `worker_name`. A second
    /// `track` call for the same `envelope.id` is a no-op.
    pub async fn track(&self, worker_name: &str, envelope: Envelope) {
        let mut inner = self.inner.write().await;
        let group = inner.entry(worker_name.to_string()).or_default();
        if group.iter().any(|e| e.envelope.id == envelope.id) {
            return;
        }
        group.push(PendingEntry { envelope, sent_at: Instant::now() });
    }

    /// Resolve (remove) the entry in `worker_name`'s group matching
    /// `correlation_id`, returning its envelope if found.
    pub async fn resolve(&self, worker_name: &str, correlation_id: Uuid) -> Option<Envelope> {
        let mut inner = self.inner.write().await;
        let group = inner.get_mut(worker_name)?;
        let index = group.iter().position(|e| e.envelope.correlation_id == correlation_id)?;
        Some(group.remove(index).envelope)
    }

    /// Resolve a correlation id against every group, for replies whose
    /// originating worker name can't be derived from the reply alone.
    pub async fn resolve_any(&self, correlation_id: Uuid) -> Option<Envelope> {
        let mut inner = self.inner.write().await;
        for group in inner.values_mut() {
            if let Some(index) = group.iter().position(|e| e.envelope.correlation_id == correlation_id) {
                return Some(group.remove(index).envelope);
            }
        }
        None
    }

    /// All envelopes still outstanding for `worker_name`, in send order.
    /// Used by the supervisor to replay a dead worker's pending work to
    /// its replacement (§8 "Supervisor replay").
    pub async fn entries_for(&self, worker_name: &str) -> Vec<Envelope> {
        self.inner
            .read()
            .await
            .get(worker_name)
            .map(|group| group.iter().map(|e| e.envelope.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.values().map(|g| g.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// `(worker_name, message_id)` pairs whose entries have been
    /// outstanding longer than `timeout`.
    pub async fn stale(&self, timeout: Duration) -> Vec<(String, Uuid)> {
        let inner = self.inner.read().await;
        inner
            .iter()
            .flat_map(|(worker_name, group)| {
                group
                    .iter()
                    .filter(|e| e.sent_at.elapsed() > timeout)
                    .map(|e| (worker_name.clone(), e.envelope.id))
            })
            .collect()
    }
}

pub type SharedPendingTable = Arc<PendingMessageTable>;
