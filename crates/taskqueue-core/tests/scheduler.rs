//! Concrete scenarios against `taskqueue-testing`'s in-memory store.
//!
//! S1–S6 from the scheduler's testable properties: a plain success, a
//! retry that eventually succeeds, exhausting `max_retry`, a stop that
//! pre-empts a pending dispatch followed by an operator retry, per-task
//! FIFO ordering under load, and leadership rotation between two
//! scheduler instances sharing a lock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskqueue_core::registry::FromFn;
use taskqueue_core::{
    Handler, JobStatus, Outcome, Persistent, Scheduler, SchedulerConfig,
};
use taskqueue_core::lock::{LockSession, SessionLock};
use taskqueue_testing::MemoryStore;
use tokio::sync::watch;

async fn run_until<F>(store: &MemoryStore, task_name: &str, timeout: Duration, mut done: F)
where
    F: FnMut(&[taskqueue_core::Job]) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let jobs: Vec<_> = store
            .all()
            .into_iter()
            .filter(|j| j.task_name == task_name)
            .collect();
        if done(&jobs) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}, last state: {jobs:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn s1_success() {
    let store = Arc::new(MemoryStore::new());
    let config = SchedulerConfig::default();
    let scheduler = Scheduler::new(store.clone(), &config);
    scheduler.register_task("T", Arc::new(FromFn(|_a: Vec<u8>| async move { Ok(()) })), 10);

    let job = scheduler.add_job("T", 3, b"a".to_vec()).await.unwrap();

    let handle = scheduler.clone();
    let runner = tokio::spawn(async move { handle.run().await });
    run_until(&store, "T", Duration::from_secs(2), |jobs| {
        jobs.iter().any(|j| j.status.is_terminal())
    })
    .await;
    scheduler.shutdown();
    runner.await.unwrap();

    let saved = store.find_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(saved.status, JobStatus::Success);
    assert_eq!(saved.retries, 0);
    assert_eq!(saved.error, "");
    assert!(saved.finished_at.is_some());
}

#[tokio::test]
async fn s2_retry_then_success() {
    let store = Arc::new(MemoryStore::new());
    let config = SchedulerConfig::default();
    let scheduler = Scheduler::new(store.clone(), &config);

    struct FlakyOnce(AtomicUsize);
    #[async_trait]
    impl Handler for FlakyOnce {
        async fn handle(&self, _arguments: &[u8]) -> Outcome {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                Outcome::retry(Duration::from_millis(10), "again")
            } else {
                Outcome::Done
            }
        }
    }
    scheduler.register_task("T", Arc::new(FlakyOnce(AtomicUsize::new(0))), 10);

    let started = tokio::time::Instant::now();
    let job = scheduler.add_job("T", 3, b"a".to_vec()).await.unwrap();

    let handle = scheduler.clone();
    let runner = tokio::spawn(async move { handle.run().await });
    run_until(&store, "T", Duration::from_secs(2), |jobs| {
        jobs.iter().any(|j| j.status.is_terminal())
    })
    .await;
    scheduler.shutdown();
    runner.await.unwrap();
    let elapsed = started.elapsed();

    let saved = store.find_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(saved.status, JobStatus::Success);
    assert_eq!(saved.retries, 1);
    assert_eq!(saved.error, "");
    assert!(elapsed >= Duration::from_millis(10));
}

#[tokio::test]
async fn s3_exhaust() {
    let store = Arc::new(MemoryStore::new());
    let config = SchedulerConfig::default();
    let scheduler = Scheduler::new(store.clone(), &config);

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();
    scheduler.register_task(
        "T",
        Arc::new(FromFn(move |_a: Vec<u8>| {
            attempts_clone.fetch_add(1, Ordering::SeqCst);
            async move { Err(anyhow::anyhow!("boom")) }
        })),
        10,
    );

    let job = scheduler.add_job("T", 2, b"a".to_vec()).await.unwrap();

    let handle = scheduler.clone();
    let runner = tokio::spawn(async move { handle.run().await });
    run_until(&store, "T", Duration::from_secs(2), |jobs| {
        jobs.iter().any(|j| j.status.is_terminal())
    })
    .await;
    scheduler.shutdown();
    runner.await.unwrap();

    let saved = store.find_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(saved.status, JobStatus::Failure);
    assert_eq!(saved.retries, 2);
    assert_eq!(saved.error, "boom");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn s4_stop_then_retry() {
    let store = Arc::new(MemoryStore::new());
    let config = SchedulerConfig::default();
    let scheduler = Scheduler::new(store.clone(), &config);

    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = ran.clone();
    scheduler.register_task(
        "T",
        Arc::new(FromFn(move |_a: Vec<u8>| {
            let ran = ran_clone.clone();
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })),
        10,
    );

    let job = scheduler.add_job("T", 5, b"x".to_vec()).await.unwrap();
    scheduler.stop_job(&job.id).await.unwrap();

    let handle = scheduler.clone();
    let runner = tokio::spawn(async move { handle.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopped = store.find_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stopped.status, JobStatus::Stopped);
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    scheduler.retry_job(&job.id).await.unwrap();
    run_until(&store, "T", Duration::from_secs(2), |jobs| {
        jobs.iter().any(|j| j.status == JobStatus::Success)
    })
    .await;
    scheduler.shutdown();
    runner.await.unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    let retried = store.find_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(retried.status, JobStatus::Success);
    assert_eq!(retried.retries, 0);
}

#[tokio::test]
async fn s5_per_task_ordering() {
    let store = Arc::new(MemoryStore::new());
    let config = SchedulerConfig::default();
    let scheduler = Scheduler::new(store.clone(), &config);

    let arrival: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let arrival_clone = arrival.clone();
    scheduler.register_task(
        "T",
        Arc::new(FromFn(move |arguments: Vec<u8>| {
            let arrival = arrival_clone.clone();
            async move {
                arrival.lock().unwrap().push(arguments[0]);
                Ok(())
            }
        })),
        10,
    );

    const N: usize = 100;
    for i in 0..N {
        scheduler.add_job("T", 1, vec![i as u8]).await.unwrap();
    }

    let handle = scheduler.clone();
    let runner = tokio::spawn(async move { handle.run().await });
    run_until(&store, "T", Duration::from_secs(5), |jobs| {
        jobs.len() == N && jobs.iter().all(|j| j.status.is_terminal())
    })
    .await;
    scheduler.shutdown();
    runner.await.unwrap();

    let observed = arrival.lock().unwrap().clone();
    let expected: Vec<u8> = (0..N as u8).collect();
    assert_eq!(observed, expected);
}

/// A `SessionLock` shared by two `Scheduler` instances: exclusive, loses no
/// acquire request, and hands leadership to whichever side is waiting once
/// the holder releases.
struct SharedMockLock {
    state: tokio::sync::Mutex<Option<watch::Sender<bool>>>,
}

impl SharedMockLock {
    fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl SessionLock for SharedMockLock {
    async fn acquire(&self, _value: &str) -> anyhow::Result<LockSession> {
        loop {
            let mut guard = self.state.lock().await;
            if guard.is_none() {
                let (tx, rx) = watch::channel(true);
                *guard = Some(tx.clone());
                return Ok(LockSession::new(rx, tx));
            }
            drop(guard);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn release(&self) -> anyhow::Result<()> {
        let mut guard = self.state.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.send(false);
        }
        drop(guard);
        // give a waiting acquirer a window before this instance loops back.
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn s6_leadership_rotation() {
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(SharedMockLock::new());
    let config = SchedulerConfig {
        consul_max_job_rebalance: 5,
        ..SchedulerConfig::default()
    };

    let dispatches = Arc::new(AtomicUsize::new(0));
    let make_handler = || {
        let dispatches = dispatches.clone();
        Arc::new(FromFn(move |_a: Vec<u8>| {
            let dispatches = dispatches.clone();
            async move {
                dispatches.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
    };

    let scheduler_a = Scheduler::with_lock(store.clone(), &config, lock.clone());
    scheduler_a.register_task("T", make_handler(), 10);

    const N: usize = 12;
    for i in 0..N {
        scheduler_a.add_job("T", 1, vec![i as u8]).await.unwrap();
    }

    let scheduler_b = Scheduler::with_lock(store.clone(), &config, lock.clone());
    scheduler_b.register_task("T", make_handler(), 10);
    scheduler_b.hydrate().await.unwrap();

    let handle_a = scheduler_a.clone();
    let runner_a = tokio::spawn(async move { handle_a.run().await });
    let handle_b = scheduler_b.clone();
    let runner_b = tokio::spawn(async move { handle_b.run().await });

    run_until(&store, "T", Duration::from_secs(10), |jobs| {
        jobs.len() == N && jobs.iter().all(|j| j.status == JobStatus::Success)
    })
    .await;

    scheduler_a.shutdown();
    scheduler_b.shutdown();
    runner_a.await.unwrap();
    runner_b.await.unwrap();

    assert_eq!(dispatches.load(Ordering::SeqCst), N);
}
