//! The Dispatcher (§4.3, §4.4): turns a multiplexer tick into one handler
//! invocation, and exposes the operator control API consumed by the
//! dashboard mutations (`AddJob`, `StopJob`, `StopAllJob`, `RetryJob`,
//! `RetryAllJob`, `CleanJob`).

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SchedulerError};
use crate::hub::SubscriberHub;
use crate::job::{Filter, Job, JobStatus};
use crate::multiplexer::Multiplexer;
use crate::persistent::Persistent;
use crate::queue::Queue;
use crate::registry::TaskRegistry;
use crate::retry::{Outcome, RetryPolicy};
use crate::tracer::{Tracer, TracingSpanTracer};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Duration;

/// Ties the registry, queue, multiplexer, store and subscriber hub together
/// into one dispatch attempt, bounded by a global concurrency permit
/// (`MAX_GOROUTINES`, §6) and, per task, a width-1 permit that keeps a
/// single task's handlers from ever overlapping (§5).
pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    persistent: Arc<dyn Persistent>,
    queue: Arc<Queue>,
    multiplexer: Arc<Multiplexer>,
    hub: Arc<SubscriberHub>,
    tracer: Arc<dyn Tracer>,
    clock: Arc<dyn Clock>,
    global_semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    task_semaphores: DashMap<String, Arc<Semaphore>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        persistent: Arc<dyn Persistent>,
        queue: Arc<Queue>,
        multiplexer: Arc<Multiplexer>,
        hub: Arc<SubscriberHub>,
        max_concurrency: usize,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            registry,
            persistent,
            queue,
            multiplexer,
            hub,
            tracer: Arc::new(TracingSpanTracer),
            clock: Arc::new(SystemClock),
            global_semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            task_semaphores: DashMap::new(),
        }
    }

    /// Block until every in-flight handler has finished, i.e. every
    /// concurrency permit is free (§4.6 shutdown drain).
    pub async fn drain(&self) {
        let _ = self
            .global_semaphore
            .acquire_many(self.max_concurrency as u32)
            .await;
    }

    fn task_semaphore(&self, task_name: &str) -> Arc<Semaphore> {
        self.task_semaphores
            .entry(task_name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn arm_if_pending(&self, task_name: &str, delay: Duration) {
        if self.queue.is_empty(task_name) {
            return;
        }
        if let Some(worker_index) = self.registry.worker_index(task_name) {
            self.multiplexer.arm(worker_index, delay);
        }
    }

    async fn broadcast(&self, task_name: &str) {
        let task_names = self.registry.task_names();
        self.hub
            .broadcast_task_list(self.persistent.as_ref(), &task_names)
            .await;
        self.hub
            .broadcast_job_list(self.persistent.as_ref(), task_name)
            .await;
    }

    /// Submit a new job for an already-registered task (`AddJob`).
    pub async fn add_job(
        &self,
        task_name: &str,
        max_retry: u32,
        arguments: Vec<u8>,
    ) -> Result<Job> {
        if !self.registry.is_registered(task_name) {
            return Err(SchedulerError::NotRegistered(task_name.to_string()));
        }
        let job = Job::new(task_name, max_retry, arguments);
        let saved = self
            .persistent
            .save_job(job)
            .await
            .map_err(|e| SchedulerError::Transient(e.to_string()))?;
        self.queue.push(task_name, saved.id.clone());
        self.arm_if_pending(task_name, Duration::from_millis(0));
        self.broadcast(task_name).await;
        Ok(saved)
    }

    /// Mark a single job `Stopped`. Does not cancel an in-flight attempt
    /// (§4.4 invariant: stop is a flag, not a cancellation signal).
    pub async fn stop_job(&self, job_id: &str) -> Result<()> {
        let mut job = self
            .persistent
            .find_job_by_id(job_id)
            .await
            .map_err(|e| SchedulerError::Transient(e.to_string()))?
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;
        job.status = JobStatus::Stopped;
        job.finished_at = Some(self.clock.now());
        let task_name = job.task_name.clone();
        self.persistent
            .save_job(job)
            .await
            .map_err(|e| SchedulerError::Transient(e.to_string()))?;
        self.broadcast(&task_name).await;
        Ok(())
    }

    /// Drop every pending entry for `task_name` and bulk-transition its
    /// `Queueing`/`Retrying` jobs to `Stopped`.
    pub async fn stop_all_job(&self, task_name: &str) -> Result<()> {
        self.queue.clear(task_name);
        self.persistent
            .update_all_status(
                task_name,
                &[JobStatus::Queueing, JobStatus::Retrying],
                JobStatus::Stopped,
            )
            .await
            .map_err(|e| SchedulerError::Transient(e.to_string()))?;
        self.broadcast(task_name).await;
        Ok(())
    }

    /// Re-queue a single terminal job. A job at or past `max_retry` starts
    /// over from zero retries (§4.4); one that still has budget simply
    /// resumes as `Queueing` without touching its retry count.
    pub async fn retry_job(&self, job_id: &str) -> Result<()> {
        let mut job = self
            .persistent
            .find_job_by_id(job_id)
            .await
            .map_err(|e| SchedulerError::Transient(e.to_string()))?
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;

        if job.status == JobStatus::Failure || job.retries >= job.max_retry {
            job.reset_for_retry();
        } else {
            job.status = JobStatus::Queueing;
            job.interval = crate::job::DEFAULT_INTERVAL;
            job.finished_at = None;
        }

        let task_name = job.task_name.clone();
        let saved = self
            .persistent
            .save_job(job)
            .await
            .map_err(|e| SchedulerError::Transient(e.to_string()))?;
        self.queue.push(&task_name, saved.id.clone());
        self.arm_if_pending(&task_name, Duration::from_millis(0));
        self.broadcast(&task_name).await;
        Ok(())
    }

    /// Page through every `Failure`/`Stopped` job for `task_name`, re-queue
    /// each one, then bulk-reset them in the store (mirrors the source's
    /// page-then-bulk-update `RetryAllJob`, §4.4).
    pub async fn retry_all_job(&self, task_name: &str) -> Result<()> {
        let mut page = 1u32;
        loop {
            let filter = Filter {
                page,
                limit: 10,
                task_name: Some(task_name.to_string()),
                status: vec![JobStatus::Failure, JobStatus::Stopped],
                ..Default::default()
            };
            let jobs = self
                .persistent
                .find_all_job(&filter)
                .await
                .map_err(|e| SchedulerError::Transient(e.to_string()))?;
            if jobs.is_empty() {
                break;
            }
            for job in &jobs {
                self.queue.push(task_name, job.id.clone());
            }
            page += 1;
        }
        self.persistent
            .update_all_status(
                task_name,
                &[JobStatus::Failure, JobStatus::Stopped],
                JobStatus::Queueing,
            )
            .await
            .map_err(|e| SchedulerError::Transient(e.to_string()))?;
        self.arm_if_pending(task_name, Duration::from_millis(0));
        self.broadcast(task_name).await;
        Ok(())
    }

    /// Delete every non-pending job for `task_name` (§4.2 `clean_job`).
    pub async fn clean_job(&self, task_name: &str) -> Result<()> {
        self.persistent
            .clean_job(task_name)
            .await
            .map_err(|e| SchedulerError::Transient(e.to_string()))?;
        self.broadcast(task_name).await;
        Ok(())
    }

    /// Handle one multiplexer tick: pop the head of `worker_index`'s lane,
    /// run its handler under a concurrency permit, apply the retry policy,
    /// persist, and re-arm as needed. Never panics the caller: a handler
    /// panic is caught and converted to `Outcome::Fatal` (§7).
    pub async fn dispatch_step(self: Arc<Self>, worker_index: usize) {
        let Some(task_name) = self.registry.task_name_for_index(worker_index) else {
            return;
        };
        let Some(job_id) = self.queue.pop(&task_name) else {
            return;
        };
        let Some(handler) = self.registry.handler(&task_name) else {
            return;
        };

        let mut job = match self.persistent.find_job_by_id(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.arm_if_pending(&task_name, Duration::from_millis(0));
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, job_id, "find_job_by_id failed, dropping attempt");
                return;
            }
        };

        let discard = job.status == JobStatus::Stopped
            || job.status == JobStatus::Success
            || (job.status == JobStatus::Failure && job.retries >= job.max_retry);
        if discard {
            self.broadcast(&task_name).await;
            self.arm_if_pending(&task_name, Duration::from_millis(0));
            return;
        }

        job.status = JobStatus::Retrying;
        if let Err(e) = self.persistent.save_job(job.clone()).await {
            tracing::error!(error = %e, job_id, "save_job (retrying) failed, dropping attempt");
            return;
        }
        self.broadcast(&task_name).await;

        let task_permit = match self.task_semaphore(&task_name).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let global_permit = match self.global_semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let mut span = self.tracer.start(&format!("dispatch.{task_name}"));
        job.trace_id = span.trace_id();
        span.set_tag("job_id", &job.id);
        span.set_tag("attempt", &job.retries.to_string());

        let arguments = job.arguments.clone();
        let outcome = match tokio::spawn(async move { handler.handle(&arguments).await }).await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => {
                Outcome::from_panic(join_error.into_panic().as_ref())
            }
            Err(_) => Outcome::fatal("handler task was cancelled"),
        };

        if let Outcome::Fatal { message } = &outcome {
            span.set_error(message);
        }
        span.finish();

        let requeue = RetryPolicy::apply(&mut job, outcome, self.clock.now());
        let saved = match self.persistent.save_job(job.normalized()).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(error = %e, job_id, "save_job failed after dispatch");
                drop(global_permit);
                drop(task_permit);
                return;
            }
        };
        drop(global_permit);
        drop(task_permit);

        if requeue {
            self.queue.push(&task_name, saved.id.clone());
            self.arm_if_pending(&task_name, saved.interval);
        } else {
            self.arm_if_pending(&task_name, Duration::from_millis(0));
        }

        self.broadcast(&task_name).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FromFn, Handler};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemStore {
        jobs: Mutex<DashMap<String, Job>>,
        next_id: AtomicI64,
    }

    #[async_trait]
    impl Persistent for MemStore {
        async fn find_all_job(&self, filter: &Filter) -> anyhow::Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs
                .iter()
                .filter(|e| {
                    filter.task_name.as_deref().map_or(true, |t| e.value().task_name == t)
                        && (filter.status.is_empty() || filter.status.contains(&e.value().status))
                })
                .map(|e| e.value().clone())
                .collect())
        }
        async fn count_all_job(&self, filter: &Filter) -> anyhow::Result<i64> {
            Ok(self.find_all_job(filter).await?.len() as i64)
        }
        async fn aggregate_all_task_job(
            &self,
            filter: &Filter,
        ) -> anyhow::Result<Vec<crate::job::TaskSummary>> {
            Ok(filter
                .task_name_list
                .iter()
                .map(|n| crate::job::TaskSummary::empty(n.clone()))
                .collect())
        }
        async fn save_job(&self, mut job: Job) -> anyhow::Result<Job> {
            if job.id.is_empty() {
                job.id = format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            }
            self.jobs.lock().unwrap().insert(job.id.clone(), job.clone());
            Ok(job)
        }
        async fn find_job_by_id(&self, id: &str) -> anyhow::Result<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(id).map(|e| e.value().clone()))
        }
        async fn update_all_status(
            &self,
            task_name: &str,
            current: &[JobStatus],
            new_status: JobStatus,
        ) -> anyhow::Result<()> {
            let jobs = self.jobs.lock().unwrap();
            for mut entry in jobs.iter_mut() {
                if entry.task_name == task_name && current.contains(&entry.status) {
                    entry.status = new_status;
                    entry.retries = 0;
                }
            }
            Ok(())
        }
        async fn clean_job(&self, task_name: &str) -> anyhow::Result<()> {
            self.jobs
                .lock()
                .unwrap()
                .retain(|_, j| j.task_name != task_name || j.status.is_pending());
            Ok(())
        }
    }

    fn setup(handler: Arc<dyn Handler>) -> (Arc<Dispatcher>, Arc<MemStore>) {
        let registry = Arc::new(TaskRegistry::new());
        registry.register("email", handler, 10);
        let store = Arc::new(MemStore::default());
        let queue = Arc::new(Queue::new());
        let multiplexer = Arc::new(Multiplexer::new());
        let hub = Arc::new(SubscriberHub::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            store.clone(),
            queue,
            multiplexer,
            hub,
            4,
        ));
        (dispatcher, store)
    }

    #[tokio::test]
    async fn add_job_to_unregistered_task_fails() {
        let (dispatcher, _) = setup(Arc::new(FromFn(|_a: Vec<u8>| async move { Ok(()) })));
        let err = dispatcher.add_job("ghost", 3, vec![]).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn successful_dispatch_marks_job_success() {
        let (dispatcher, store) =
            setup(Arc::new(FromFn(|_a: Vec<u8>| async move { Ok(()) })));
        let job = dispatcher.add_job("email", 3, b"x".to_vec()).await.unwrap();
        let worker_index = 1;
        dispatcher.clone().dispatch_step(worker_index).await;
        let saved = store.find_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(saved.status, JobStatus::Success);
    }

    #[tokio::test]
    async fn failing_handler_requeues_until_max_retry() {
        let (dispatcher, store) = setup(Arc::new(FromFn(|_a: Vec<u8>| async move {
            Err(anyhow::anyhow!("boom"))
        })));
        let job = dispatcher.add_job("email", 2, b"x".to_vec()).await.unwrap();
        dispatcher.clone().dispatch_step(1).await;
        let after_first = store.find_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(after_first.status, JobStatus::Queueing);
        assert_eq!(after_first.retries, 1);

        dispatcher.clone().dispatch_step(1).await;
        let after_second = store.find_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(after_second.status, JobStatus::Failure);
        assert_eq!(after_second.retries, 2);
    }

    #[tokio::test]
    async fn stop_job_prevents_a_pending_dispatch_from_running() {
        let ran = Arc::new(AtomicI64::new(0));
        let ran_clone = ran.clone();
        let (dispatcher, store) = setup(Arc::new(FromFn(move |_a: Vec<u8>| {
            let ran = ran_clone.clone();
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })));
        let job = dispatcher.add_job("email", 3, vec![]).await.unwrap();
        dispatcher.stop_job(&job.id).await.unwrap();
        dispatcher.clone().dispatch_step(1).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        let saved = store.find_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(saved.status, JobStatus::Stopped);
    }

    #[tokio::test]
    async fn retry_job_resets_a_failed_job() {
        let (dispatcher, store) = setup(Arc::new(FromFn(|_a: Vec<u8>| async move {
            Err(anyhow::anyhow!("boom"))
        })));
        let job = dispatcher.add_job("email", 1, vec![]).await.unwrap();
        dispatcher.clone().dispatch_step(1).await;
        let failed = store.find_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failure);

        dispatcher.retry_job(&job.id).await.unwrap();
        let retried = store.find_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Queueing);
        assert_eq!(retried.retries, 0);
    }
}
