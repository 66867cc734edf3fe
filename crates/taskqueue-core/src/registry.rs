//! Task Registry: `{task_name → handler, worker_index}` and its inverse index.

use crate::retry::Outcome;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The handler contract consumed by the dispatcher (§6).
///
/// A handler that wants to fail without an explicit delay hint should return
/// `Err` from an ordinary fallible function; `HandlerFn` blanket-implements
/// the conversion into [`Outcome::Fatal`] for any `async fn(&[u8]) ->
/// anyhow::Result<()>`-shaped closure via [`FromFn`].
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, arguments: &[u8]) -> Outcome;
}

/// Adapts a plain `Fn(&[u8]) -> Fut<Output = anyhow::Result<()>>` closure into
/// a [`Handler`], mirroring the "no adapter needed" ergonomics of the
/// teacher's `Effect` closures in `demos/http-fetcher` and `demos/email-sender`.
pub struct FromFn<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FromFn<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, arguments: &[u8]) -> Outcome {
        match (self.0)(arguments.to_vec()).await {
            Ok(()) => Outcome::Done,
            Err(e) => Outcome::fatal(e.to_string()),
        }
    }
}

struct RegisteredTask {
    handler: Arc<dyn Handler>,
    worker_index: usize,
    max_client_subscribers: usize,
}

/// `{task_name → handler, worker_index}` plus the inverse
/// `worker_index → task_name` lookup the multiplexer uses to address timers.
///
/// `worker_index = 0` is reserved for the refresh control channel (§3); real
/// tasks start at index 1, assigned in registration order and never reused
/// or shifted while the scheduler runs (§4.3).
#[derive(Default)]
pub struct TaskRegistry {
    by_name: DashMap<String, RegisteredTask>,
    by_index: DashMap<usize, String>,
    next_index: AtomicUsize,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_index: DashMap::new(),
            next_index: AtomicUsize::new(1),
        }
    }

    /// Register a task. Re-registering an existing name keeps its original
    /// `worker_index` (idempotent refresh, §4.3) but swaps the handler.
    pub fn register(
        &self,
        task_name: impl Into<String>,
        handler: Arc<dyn Handler>,
        max_client_subscribers: usize,
    ) -> usize {
        let task_name = task_name.into();
        if let Some(mut existing) = self.by_name.get_mut(&task_name) {
            existing.handler = handler;
            existing.max_client_subscribers = max_client_subscribers;
            return existing.worker_index;
        }
        let worker_index = self.next_index.fetch_add(1, Ordering::SeqCst);
        self.by_index.insert(worker_index, task_name.clone());
        self.by_name.insert(
            task_name,
            RegisteredTask {
                handler,
                worker_index,
                max_client_subscribers,
            },
        );
        worker_index
    }

    pub fn is_registered(&self, task_name: &str) -> bool {
        self.by_name.contains_key(task_name)
    }

    pub fn worker_index(&self, task_name: &str) -> Option<usize> {
        self.by_name.get(task_name).map(|t| t.worker_index)
    }

    pub fn task_name_for_index(&self, worker_index: usize) -> Option<String> {
        self.by_index.get(&worker_index).map(|n| n.clone())
    }

    pub fn handler(&self, task_name: &str) -> Option<Arc<dyn Handler>> {
        self.by_name.get(task_name).map(|t| t.handler.clone())
    }

    pub fn max_client_subscribers(&self, task_name: &str) -> Option<usize> {
        self.by_name.get(task_name).map(|t| t.max_client_subscribers)
    }

    pub fn task_names(&self) -> Vec<String> {
        self.by_name.iter().map(|e| e.key().clone()).collect()
    }
}
