//! Lifecycle (§4.6): boot, distributed lock gating, the multiplex run loop,
//! and graceful shutdown.
//!
//! The original source keeps its queue, repository handle and subscriber
//! maps as package-level mutable globals (§9 design note). This
//! implementation instead owns every one of those fields on a single
//! [`Scheduler`] value behind `Arc`, and hands out a cloneable
//! [`SchedulerHandle`] to the dashboard crate and any other transport.

use crate::clock::{new_id, Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::hub::{JobListMessage, SubscriberHub, TaskListMessage};
use crate::job::{Filter, Job, JobStatus};
use crate::lock::{NoopLock, SessionLock};
use crate::multiplexer::Multiplexer;
use crate::persistent::Persistent;
use crate::queue::Queue;
use crate::registry::{Handler, TaskRegistry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Owns every collaborator named in §2 and drives the multiplex loop.
pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    queue: Arc<Queue>,
    persistent: Arc<dyn Persistent>,
    multiplexer: Arc<Multiplexer>,
    hub: Arc<SubscriberHub>,
    dispatcher: Arc<Dispatcher>,
    lock: Arc<dyn SessionLock>,
    clock: Arc<dyn Clock>,
    instance_id: String,
    consul_max_job_rebalance: u64,
    dispatched_since_acquire: AtomicU64,
    shutdown: CancellationToken,
}

/// Cheaply cloneable reference to a running (or not-yet-started)
/// [`Scheduler`], handed to the dashboard transport and any test harness.
#[derive(Clone)]
pub struct SchedulerHandle(Arc<Scheduler>);

impl Scheduler {
    pub fn new(persistent: Arc<dyn Persistent>, config: &SchedulerConfig) -> SchedulerHandle {
        Self::with_lock(persistent, config, Arc::new(NoopLock))
    }

    pub fn with_lock(
        persistent: Arc<dyn Persistent>,
        config: &SchedulerConfig,
        lock: Arc<dyn SessionLock>,
    ) -> SchedulerHandle {
        let registry = Arc::new(TaskRegistry::new());
        let queue = Arc::new(Queue::new());
        let multiplexer = Arc::new(Multiplexer::new());
        let hub = Arc::new(SubscriberHub::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            persistent.clone(),
            queue.clone(),
            multiplexer.clone(),
            hub.clone(),
            config.max_goroutines,
        ));
        SchedulerHandle(Arc::new(Scheduler {
            registry,
            queue,
            persistent,
            multiplexer,
            hub,
            dispatcher,
            lock,
            clock: Arc::new(SystemClock),
            instance_id: new_id(),
            consul_max_job_rebalance: config.consul_max_job_rebalance,
            dispatched_since_acquire: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }))
    }
}

impl SchedulerHandle {
    /// Register a task's handler. Idempotent: re-registering the same name
    /// keeps its `worker_index` and only swaps the handler (§4.3).
    pub fn register_task(
        &self,
        task_name: impl Into<String>,
        handler: Arc<dyn Handler>,
        max_client_subscribers: usize,
    ) -> usize {
        let task_name = task_name.into();
        let worker_index = self.0.registry.register(task_name.clone(), handler, max_client_subscribers);
        self.0.multiplexer.refresh();
        worker_index
    }

    /// Re-enqueue persisted `Queueing`/`Retrying` jobs for every registered
    /// task in ascending `created_at` order (§4.1, §4.6 step 3).
    pub async fn hydrate(&self) -> anyhow::Result<()> {
        for task_name in self.0.registry.task_names() {
            let filter = Filter {
                task_name: Some(task_name.clone()),
                status: vec![JobStatus::Queueing, JobStatus::Retrying],
                show_all: true,
                ..Default::default()
            };
            let mut jobs = self.0.persistent.find_all_job(&filter).await?;
            // Persistent orders descending by created_at; hydration wants ascending.
            jobs.reverse();
            for job in &jobs {
                self.0.queue.push(&task_name, job.id.clone());
            }
            if !jobs.is_empty() {
                if let Some(worker_index) = self.0.registry.worker_index(&task_name) {
                    self.0.multiplexer.arm(worker_index, std::time::Duration::from_millis(0));
                }
            }
        }
        Ok(())
    }

    pub async fn add_job(&self, task_name: &str, max_retry: u32, arguments: Vec<u8>) -> Result<Job> {
        self.0.dispatcher.add_job(task_name, max_retry, arguments).await
    }

    pub async fn stop_job(&self, job_id: &str) -> Result<()> {
        self.0.dispatcher.stop_job(job_id).await
    }

    pub async fn stop_all_job(&self, task_name: &str) -> Result<()> {
        self.0.dispatcher.stop_all_job(task_name).await
    }

    pub async fn retry_job(&self, job_id: &str) -> Result<()> {
        self.0.dispatcher.retry_job(job_id).await
    }

    pub async fn retry_all_job(&self, task_name: &str) -> Result<()> {
        self.0.dispatcher.retry_all_job(task_name).await
    }

    pub async fn clean_job(&self, task_name: &str) -> Result<()> {
        self.0.dispatcher.clean_job(task_name).await
    }

    pub async fn clear_all_client_subscribers(&self) {
        self.0.hub.clear_all().await;
    }

    /// Client ids of every live TaskList/JobList subscriber, for the
    /// dashboard's `tagline` query.
    pub fn task_list_client_ids(&self) -> Vec<String> {
        self.0.hub.task_list_client_ids()
    }

    pub fn job_list_client_ids(&self) -> Vec<String> {
        self.0.hub.job_list_client_ids()
    }

    pub fn subscribe_task_list(
        &self,
        client_id: impl Into<String>,
        max_client_subscribers: usize,
    ) -> Result<mpsc::Receiver<TaskListMessage>> {
        self.0.hub.register_task_list(client_id, max_client_subscribers)
    }

    pub fn unsubscribe_task_list(&self, client_id: &str) {
        self.0.hub.remove_task_list(client_id);
    }

    pub fn subscribe_job_list(
        &self,
        client_id: impl Into<String>,
        filter: Filter,
        max_client_subscribers: usize,
    ) -> Result<mpsc::Receiver<JobListMessage>> {
        self.0.hub.register_job_list(client_id, filter, max_client_subscribers)
    }

    pub fn unsubscribe_job_list(&self, client_id: &str) {
        self.0.hub.remove_job_list(client_id);
    }

    /// Recompute and push the TaskList summary to every subscriber. Used by
    /// the dashboard to send a fresh client an immediate snapshot (§4.5).
    pub async fn broadcast_task_list(&self) {
        let task_names = self.0.registry.task_names();
        self.0.hub.broadcast_task_list(self.0.persistent.as_ref(), &task_names).await;
    }

    /// Recompute and push the JobList page to every subscriber of
    /// `task_name`, including one that just registered.
    pub async fn broadcast_job_list(&self, task_name: &str) {
        self.0.hub.broadcast_job_list(self.0.persistent.as_ref(), task_name).await;
    }

    pub fn persistent(&self) -> Arc<dyn Persistent> {
        self.0.persistent.clone()
    }

    /// `max_client_subscribers` configured at registration time for
    /// `task_name`, used by the dashboard to enforce the JobList per-task cap.
    pub fn max_client_subscribers_for(&self, task_name: &str) -> Option<usize> {
        self.0.registry.max_client_subscribers(task_name)
    }

    pub fn is_task_registered(&self, task_name: &str) -> bool {
        self.0.registry.is_registered(task_name)
    }

    /// Run the multiplex loop until [`SchedulerHandle::shutdown`] is called.
    /// Blocks on the distributed lock first when one is configured (§4.6
    /// step 4); rotates leadership every `consul_max_job_rebalance`
    /// dispatches when the lock is real coordination, not the no-op default.
    pub async fn run(&self) {
        loop {
            let session = match self.0.lock.acquire(&self.0.instance_id).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(error = %e, "failed to acquire session lock, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };
            tracing::info!(instance_id = %self.0.instance_id, "leadership acquired");
            self.0.dispatched_since_acquire.store(0, Ordering::SeqCst);

            if self.drain_one_leadership_term(&session).await {
                return;
            }
            let _ = self.0.lock.release().await;
            tracing::info!(instance_id = %self.0.instance_id, "leadership released, rotating");
        }
    }

    /// Runs dispatch ticks until the lock is lost, the rebalance ceiling is
    /// hit, or shutdown is requested. Returns `true` if the loop should stop
    /// entirely (shutdown), `false` if it should re-acquire and continue.
    async fn drain_one_leadership_term(&self, session: &crate::lock::LockSession) -> bool {
        let mut held = session.held.clone();
        loop {
            tokio::select! {
                biased;
                _ = self.0.shutdown.cancelled() => {
                    self.shutdown_sequence().await;
                    return true;
                }
                changed = held.changed() => {
                    if changed.is_err() || !*held.borrow() {
                        return false;
                    }
                }
                worker_index = self.0.multiplexer.wait_for_tick() => {
                    let dispatcher = self.0.dispatcher.clone();
                    tokio::spawn(dispatcher.dispatch_step(worker_index));

                    if self.0.consul_max_job_rebalance > 0 {
                        let count = self.0.dispatched_since_acquire.fetch_add(1, Ordering::SeqCst) + 1;
                        if count >= self.0.consul_max_job_rebalance {
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// Signal the run loop to exit after finishing its current iteration.
    pub fn shutdown(&self) {
        self.0.shutdown.cancel();
    }

    async fn shutdown_sequence(&self) {
        let in_flight: usize = self
            .0
            .registry
            .task_names()
            .iter()
            .map(|task_name| self.0.queue.len(task_name))
            .sum();
        tracing::info!(jobs_awaiting_completion = in_flight, "shutdown requested, draining in-flight jobs");
        self.0.dispatcher.drain().await;
        let _ = self.0.lock.release().await;
        let _ = self.0.lock.destroy().await;
        self.0.hub.clear_all().await;
        tracing::info!("shutdown complete");
    }
}
