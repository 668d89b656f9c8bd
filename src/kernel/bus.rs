//! Routes envelopes to worker tasks over per-worker-class `mpsc` channels.
//!
//! The reference's `seesaw-rs` bus (`bus.rs`) broadcasts every event to
//! every subscriber; that fan-out is wrong here, where an envelope must
//! land on exactly one worker of the target class. `MessageBus` keeps a
//! registry of per-worker-class round-robin senders instead, each slot
//! carrying a shared busy flag so routing can skip an instance that is
//! mid-request (§4.6) rather than queue behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use super::envelope::Envelope;
use crate::error::{GatheringError, Result};

const WORKER_CHANNEL_CAPACITY: usize = 256;

struct WorkerSlot {
    instance_id: String,
    sender: mpsc::Sender<Envelope>,
    busy: Arc<AtomicBool>,
}

#[derive(Default)]
struct ClassRoute {
    slots: Vec<WorkerSlot>,
    next: AtomicUsize,
}

impl ClassRoute {
    /// The next non-busy slot in round-robin order, or `None` if every
    /// instance is currently occupied.
    fn pick_free(&self) -> Option<&WorkerSlot> {
        if self.slots.is_empty() {
            return None;
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        (0..self.slots.len())
            .map(|offset| &self.slots[(start + offset) % self.slots.len()])
            .find(|slot| !slot.busy.load(Ordering::Acquire))
    }
}

/// Registry of live worker inboxes, keyed by worker-class name. Each
/// class may have several task instances; `send` round-robins across
/// whichever are free, per §4.6.
#[derive(Default)]
pub struct MessageBus {
    routes: RwLock<HashMap<String, ClassRoute>>,
    replies: mpsc::Sender<Envelope>,
    reply_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Envelope>>>,
    waiters: RwLock<HashMap<Uuid, oneshot::Sender<Envelope>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        Self {
            routes: RwLock::new(HashMap::new()),
            replies: tx,
            reply_rx: tokio::sync::Mutex::new(Some(rx)),
            waiters: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new worker inbox for `worker_name`'s class, returning
    /// the receiver half the worker task should poll and the busy flag
    /// it should set/clear around handling a request — the same flag
    /// routing consults to skip a busy instance.
    pub async fn register_worker(&self, worker_name: &str, instance_id: &str) -> (mpsc::Receiver<Envelope>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        let busy = Arc::new(AtomicBool::new(false));
        let mut routes = self.routes.write().await;
        routes.entry(worker_name.to_string()).or_default().slots.push(WorkerSlot {
            instance_id: instance_id.to_string(),
            sender: tx,
            busy: busy.clone(),
        });
        (rx, busy)
    }

    /// Remove an instance's slot, e.g. after it exits and is about to be
    /// replaced. A no-op if the instance was never registered.
    pub async fn deregister_worker(&self, worker_name: &str, instance_id: &str) {
        if let Some(route) = self.routes.write().await.get_mut(worker_name) {
            route.slots.retain(|slot| slot.instance_id != instance_id);
        }
    }

    /// Route an envelope to one free worker of its destination class.
    /// Fails with [`GatheringError::UnknownDestination`] if no class of
    /// that name is registered at all, or [`GatheringError::ServerBusy`]
    /// if the class exists but every instance is currently occupied.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let worker_name = envelope
            .primary_worker()
            .ok_or_else(|| GatheringError::UnknownDestination("<empty destination>".to_string()))?
            .to_string();
        let routes = self.routes.read().await;
        let route = routes
            .get(&worker_name)
            .ok_or_else(|| GatheringError::UnknownDestination(worker_name.clone()))?;
        let slot = route.pick_free().ok_or(GatheringError::ServerBusy)?;
        slot.sender
            .send(envelope)
            .await
            .map_err(|e| GatheringError::Transport(e.to_string()))
    }

    /// The sender half workers use to post replies/status updates back
    /// to the supervisor.
    pub fn reply_sender(&self) -> mpsc::Sender<Envelope> {
        self.replies.clone()
    }

    /// Take the supervisor-side receiver for worker replies. May only be
    /// taken once; subsequent calls return `None`.
    pub async fn take_reply_receiver(&self) -> Option<mpsc::Receiver<Envelope>> {
        self.reply_rx.lock().await.take()
    }

    /// Send `envelope` to its destination and wait for a matching
    /// `respond` call, or time out. Used by a worker that needs a
    /// synchronous-feeling round trip to another worker class (e.g.
    /// CrawlWorker querying DBWorker), standing in for the reference's
    /// inter-process call with a reply.
    pub async fn request(&self, envelope: Envelope, timeout: Duration) -> Result<Envelope> {
        let correlation_id = envelope.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.waiters.write().await.insert(correlation_id, tx);
        if let Err(err) = self.send(envelope).await {
            self.waiters.write().await.remove(&correlation_id);
            return Err(err);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(GatheringError::Transport("request waiter dropped".to_string())),
            Err(_) => {
                self.waiters.write().await.remove(&correlation_id);
                Err(GatheringError::Transport("request timed out".to_string()))
            }
        }
    }

    /// Deliver a reply envelope. If a caller is blocked in [`Self::request`]
    /// on this `correlation_id`, it's woken directly; otherwise the
    /// envelope is forwarded to the generic supervisor reply channel
    /// (the fire-and-forget path used for top-level job completions,
    /// health pings, and error signals).
    pub async fn respond(&self, envelope: Envelope) {
        let waiter = self.waiters.write().await.remove(&envelope.correlation_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(envelope);
            }
            None => {
                let _ = self.replies.send(envelope).await;
            }
        }
    }

    pub async fn worker_count(&self, worker_name: &str) -> usize {
        self.routes
            .read()
            .await
            .get(worker_name)
            .map(|route| route.slots.len())
            .unwrap_or(0)
    }
}
