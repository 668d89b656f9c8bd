//! Spawns, supervises, and routes work to a pool of worker tasks.
//!
//! Grounded on `kernel/jobs/worker.rs`'s `Service` trait
//! (`async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>`)
//! and its heartbeat-via-interval pattern. Each worker class described
//! in [`crate::config::WorkerClassConfig`] gets `count` tasks spawned
//! against the bus; on exit (crash, clean return, or a forced restart
//! from [`Self::monitor_health`]) the supervisor spawns a replacement of
//! the same class and replays that class's still-outstanding pending
//! envelopes to it (§4.6, §8 "Supervisor replay").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::bus::MessageBus;
use super::envelope::{Envelope, Status};
use super::health::WorkerHealth;
use super::pending::PendingMessageTable;
use crate::error::{GatheringError, Result};

/// Cap on instances a class may be auto-scaled to in response to
/// `SERVER_BUSY`, so a pathological burst of traffic can't spawn an
/// unbounded number of workers.
const MAX_AUTO_SPAWNED_INSTANCES: usize = 4;
/// Dispatch retries (busy reroute attempts + transient-gap retries)
/// before giving up on a single envelope.
const MAX_DISPATCH_ATTEMPTS: usize = 6;
/// Fixed back-off between dispatch retries when no additional instance
/// could be spawned (§4.6 step 6).
const DISPATCH_BACKOFF: Duration = Duration::from_secs(5);

/// Everything a worker task needs to receive work, call other worker
/// classes, and reply, without owning the supervisor itself. `busy` is
/// the same flag the bus consults when routing — a worker flips it
/// around handling a request so the supervisor's router sees it as
/// occupied without a separate notification path.
pub struct WorkerContext {
    pub worker_id: String,
    pub inbox: mpsc::Receiver<Envelope>,
    pub bus: Arc<MessageBus>,
    pub shutdown: CancellationToken,
    pub busy: Arc<AtomicBool>,
}

/// A long-running worker task the supervisor can spawn, restart, and
/// shut down gracefully.
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &str;

    async fn run(self: Box<Self>, ctx: WorkerContext) -> Result<()>;
}

/// Constructs a fresh [`Service`] instance for a worker class, called
/// once per spawn (including restarts).
pub type ServiceFactory = Arc<dyn Fn(usize) -> Box<dyn Service> + Send + Sync>;

pub struct WorkerClass {
    pub name: String,
    pub count: usize,
    pub factory: ServiceFactory,
}

pub struct Supervisor {
    bus: Arc<MessageBus>,
    health: Arc<WorkerHealth>,
    pending: Arc<PendingMessageTable>,
    health_staleness: Duration,
    shutdown: CancellationToken,
    class_factories: RwLock<HashMap<String, ServiceFactory>>,
    class_next_index: RwLock<HashMap<String, Arc<AtomicUsize>>>,
    instance_tokens: RwLock<HashMap<String, CancellationToken>>,
}

impl Supervisor {
    pub fn new(health_staleness: Duration) -> Self {
        Self {
            bus: Arc::new(MessageBus::new()),
            health: Arc::new(WorkerHealth::new()),
            pending: Arc::new(PendingMessageTable::new()),
            health_staleness,
            shutdown: CancellationToken::new(),
            class_factories: RwLock::new(HashMap::new()),
            class_next_index: RwLock::new(HashMap::new()),
            instance_tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    pub fn pending(&self) -> Arc<PendingMessageTable> {
        self.pending.clone()
    }

    pub fn health(&self) -> Arc<WorkerHealth> {
        self.health.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn `class.count` instances of a worker class, each registered
    /// on the bus under `class.name` and tracked in the health table as
    /// `"<name>-<index>"`. The factory is retained so a later respawn
    /// (organic exit or forced restart) can build a replacement.
    pub async fn spawn_class(self: &Arc<Self>, class: WorkerClass) {
        self.class_factories.write().await.insert(class.name.clone(), class.factory.clone());
        self.class_next_index
            .write()
            .await
            .insert(class.name.clone(), Arc::new(AtomicUsize::new(class.count)));
        for index in 0..class.count {
            self.spawn_instance(class.name.clone(), index).await;
        }
    }

    async fn next_index_for(&self, class_name: &str) -> usize {
        if let Some(counter) = self.class_next_index.read().await.get(class_name) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        let mut counters = self.class_next_index.write().await;
        let counter = counters
            .entry(class_name.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)));
        counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn spawn_instance(self: &Arc<Self>, class_name: String, index: usize) {
        let Some(factory) = self.class_factories.read().await.get(&class_name).cloned() else {
            error!(class = %class_name, "spawn_instance called for an unconfigured class");
            return;
        };
        let worker_id = format!("{class_name}-{index}");
        let (inbox, busy) = self.bus.register_worker(&class_name, &worker_id).await;
        let instance_shutdown = self.shutdown.child_token();
        self.instance_tokens.write().await.insert(worker_id.clone(), instance_shutdown.clone());
        let service = factory(index);

        self.health.register(&worker_id).await;

        let supervisor = self.clone();
        let worker_id_task = worker_id.clone();
        let class_name_task = class_name.clone();

        tokio::spawn(async move {
            info!(worker = %worker_id_task, "starting worker");
            supervisor.health.heartbeat(&worker_id_task).await;
            let ctx = WorkerContext {
                worker_id: worker_id_task.clone(),
                inbox,
                bus: supervisor.bus.clone(),
                shutdown: instance_shutdown,
                busy,
            };
            match service.run(ctx).await {
                Ok(()) => info!(worker = %worker_id_task, "worker exited cleanly"),
                Err(err) => error!(worker = %worker_id_task, error = %err, "worker exited with error"),
            }
            supervisor.health.mark_stopped(&worker_id_task).await;
            supervisor.bus.deregister_worker(&class_name_task, &worker_id_task).await;
            supervisor.instance_tokens.write().await.remove(&worker_id_task);

            if supervisor.shutdown.is_cancelled() {
                return;
            }

            warn!(worker = %worker_id_task, class = %class_name_task, "respawning worker after exit");
            supervisor.health.record_restart(&worker_id_task).await;
            let next_index = supervisor.next_index_for(&class_name_task).await;
            supervisor.spawn_instance(class_name_task.clone(), next_index).await;
            supervisor.replay_pending(&class_name_task).await;
        });
    }

    /// Spawn one additional instance of `class_name`, capped at
    /// [`MAX_AUTO_SPAWNED_INSTANCES`]. Returns whether a spawn happened.
    async fn spawn_additional_instance(self: &Arc<Self>, class_name: &str) -> bool {
        if !self.class_factories.read().await.contains_key(class_name) {
            return false;
        }
        if self.bus.worker_count(class_name).await >= MAX_AUTO_SPAWNED_INSTANCES {
            return false;
        }
        let index = self.next_index_for(class_name).await;
        info!(class = %class_name, index, "spawning additional instance to relieve SERVER_BUSY");
        self.spawn_instance(class_name.to_string(), index).await;
        true
    }

    /// Resend every envelope still outstanding for `class_name` to its
    /// (possibly just-replaced) pool. Entries remain tracked in the
    /// pending table regardless of whether this particular resend
    /// succeeds — a later respawn will try again.
    async fn replay_pending(&self, class_name: &str) {
        let entries = self.pending.entries_for(class_name).await;
        if entries.is_empty() {
            return;
        }
        info!(class = %class_name, count = entries.len(), "replaying pending envelopes to replacement worker");
        for envelope in entries {
            if let Err(err) = self.bus.send(envelope).await {
                warn!(class = %class_name, error = %err, "replay send did not land, will retry on next respawn");
            }
        }
    }

    /// Route an envelope to a live, free worker, tracking it in the
    /// pending table so a reply (or timeout) can be matched later.
    /// Retries through `SERVER_BUSY` by spawning additional instances
    /// (up to the cap) and falls back to a fixed back-off once no more
    /// can be spawned (§4.6 steps 4-6).
    pub async fn dispatch(self: &Arc<Self>, envelope: Envelope) -> Result<()> {
        let worker_name = envelope
            .primary_worker()
            .ok_or_else(|| GatheringError::UnknownDestination("<empty destination>".to_string()))?
            .to_string();

        let mut attempt = 0usize;
        loop {
            match self.bus.send(envelope.clone()).await {
                Ok(()) => {
                    self.pending.track(&worker_name, envelope).await;
                    return Ok(());
                }
                Err(GatheringError::ServerBusy) => {
                    attempt += 1;
                    if attempt > MAX_DISPATCH_ATTEMPTS {
                        return Err(GatheringError::ServerBusy);
                    }
                    if !self.spawn_additional_instance(&worker_name).await {
                        tokio::time::sleep(DISPATCH_BACKOFF).await;
                    }
                }
                Err(GatheringError::UnknownDestination(name)) => {
                    // A class that was never configured at all can never
                    // resolve; fail fast rather than backing off.
                    if !self.class_factories.read().await.contains_key(&worker_name) {
                        return Err(GatheringError::UnknownDestination(name));
                    }
                    attempt += 1;
                    if attempt > MAX_DISPATCH_ATTEMPTS {
                        return Err(GatheringError::UnknownDestination(name));
                    }
                    tokio::time::sleep(DISPATCH_BACKOFF).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Drain replies from workers, resolving pending entries. A
    /// `Healthy` envelope updates the heartbeat of the instance named in
    /// its destination; an `Error` envelope forces that instance to
    /// restart. Runs until the bus's reply channel is dropped or
    /// shutdown is requested.
    pub async fn drain_replies<F>(&self, mut on_reply: F)
    where
        F: FnMut(Envelope) + Send,
    {
        let Some(mut rx) = self.bus.take_reply_receiver().await else {
            warn!("reply receiver already taken; drain_replies is a no-op");
            return;
        };
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                maybe_envelope = rx.recv() => {
                    match maybe_envelope {
                        Some(envelope) => self.handle_reply(envelope, &mut on_reply).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_reply<F>(&self, envelope: Envelope, on_reply: &mut F)
    where
        F: FnMut(Envelope) + Send,
    {
        match envelope.status {
            Status::Healthy => {
                if let Some(worker_id) = envelope.primary_worker() {
                    self.health.heartbeat(worker_id).await;
                }
            }
            Status::Error => {
                if let Some(worker_id) = envelope.primary_worker() {
                    self.cancel_instance(worker_id).await;
                }
                on_reply(envelope);
            }
            _ => {
                let resolved = match envelope.primary_worker() {
                    Some(worker_name) => self.pending.resolve(worker_name, envelope.correlation_id).await,
                    None => None,
                };
                if resolved.is_none() {
                    self.pending.resolve_any(envelope.correlation_id).await;
                }
                on_reply(envelope);
            }
        }
    }

    /// Force a specific worker instance to stop, by cancelling its child
    /// token. Its own run loop exits via the same branch an external
    /// shutdown would trigger, which then respawns and replays through
    /// the normal exit path.
    async fn cancel_instance(&self, worker_id: &str) {
        if let Some(token) = self.instance_tokens.read().await.get(worker_id) {
            token.cancel();
        }
    }

    /// Periodically scan for workers whose heartbeat has gone stale and
    /// force them to restart via [`Self::cancel_instance`] (§4.6).
    pub async fn monitor_health(&self) {
        let mut interval = tokio::time::interval(self.health_staleness / 2);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let stale = self.health.stale_workers(self.health_staleness).await;
                    for worker_id in stale {
                        warn!(worker = %worker_id, "worker heartbeat stale, forcing restart");
                        self.cancel_instance(&worker_id).await;
                    }
                }
            }
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }
}
