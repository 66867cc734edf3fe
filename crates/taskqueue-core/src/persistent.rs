//! The `Persistent` port (§4.2).
//!
//! Any durable store — relational, document, or in-memory — that satisfies
//! this contract may back the scheduler. A small `#[async_trait]` port the
//! core depends on, with concrete adapters living in separate crates
//! (`taskqueue-store-postgres`, `taskqueue-testing`).

use crate::job::{Filter, Job, TaskSummary};
use async_trait::async_trait;

/// Durable store of jobs plus status aggregation.
///
/// Failure mode (§4.2): every read returns empty + logs; every write logs
/// and returns. Implementations must never let a store error propagate into
/// the dispatch loop — callers treat `Err` as "logged, nothing persisted"
/// and continue.
#[async_trait]
pub trait Persistent: Send + Sync {
    /// Ordered by `created_at` descending; applies paging unless `filter.show_all`.
    async fn find_all_job(&self, filter: &Filter) -> anyhow::Result<Vec<Job>>;

    async fn count_all_job(&self, filter: &Filter) -> anyhow::Result<i64>;

    /// One entry per `filter.task_name_list`, zero-filled for unknown tasks,
    /// in input order (§4.2 invariant).
    async fn aggregate_all_task_job(&self, filter: &Filter) -> anyhow::Result<Vec<TaskSummary>>;

    /// Upsert by `id`; assigns one if empty. Returns the persisted job
    /// (with its assigned id).
    async fn save_job(&self, job: Job) -> anyhow::Result<Job>;

    async fn find_job_by_id(&self, id: &str) -> anyhow::Result<Option<Job>>;

    /// Bulk transition; also resets `retries = 0` for every matched row.
    async fn update_all_status(
        &self,
        task_name: &str,
        current_statuses: &[crate::job::JobStatus],
        new_status: crate::job::JobStatus,
    ) -> anyhow::Result<()>;

    /// Delete all jobs for `task_name` whose status is NOT in
    /// `{Queueing, Retrying}`. Never generalised to "truncate" (§9).
    async fn clean_job(&self, task_name: &str) -> anyhow::Result<()>;
}
