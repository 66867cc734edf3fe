//! In-memory [`Persistent`] adapter for tests and demos.
//!
//! A dependency-free fake that downstream crates pull in only as a
//! dev-dependency, never shipped in a production binary.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use taskqueue_core::{Filter, Job, JobStatus, Persistent, TaskSummary};

/// An in-memory [`Persistent`] store backed by a [`DashMap`].
///
/// `save_job` assigns ids from a monotonic counter when `job.id` is empty,
/// matching the "assigns one if empty" contract in `persistent::Persistent`.
pub struct MemoryStore {
    jobs: DashMap<String, Job>,
    next_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Snapshot of every stored job, for assertions in tests.
    pub fn all(&self) -> Vec<Job> {
        self.jobs.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matches(job: &Job, filter: &Filter) -> bool {
        if let Some(task_name) = &filter.task_name {
            if &job.task_name != task_name {
                return false;
            }
        }
        if !filter.task_name_list.is_empty() && !filter.task_name_list.contains(&job.task_name) {
            return false;
        }
        if !filter.status.is_empty() && !filter.status.contains(&job.status) {
            return false;
        }
        if let Some(search) = &filter.search {
            if !search.is_empty() {
                let haystack = String::from_utf8_lossy(&job.arguments);
                if !haystack.contains(search.as_str()) && !job.id.contains(search.as_str()) {
                    return false;
                }
            }
        }
        true
    }
}

#[async_trait]
impl Persistent for MemoryStore {
    async fn find_all_job(&self, filter: &Filter) -> anyhow::Result<Vec<Job>> {
        let mut matched: Vec<Job> = self
            .jobs
            .iter()
            .map(|e| e.value().clone())
            .filter(|j| Self::matches(j, filter))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if filter.show_all {
            return Ok(matched);
        }
        let filter = filter.clone().normalized();
        let offset = filter.offset() as usize;
        let limit = filter.limit as usize;
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_all_job(&self, filter: &Filter) -> anyhow::Result<i64> {
        let count = self
            .jobs
            .iter()
            .filter(|e| Self::matches(e.value(), filter))
            .count();
        Ok(count as i64)
    }

    async fn aggregate_all_task_job(&self, filter: &Filter) -> anyhow::Result<Vec<TaskSummary>> {
        let mut summaries: Vec<TaskSummary> = filter
            .task_name_list
            .iter()
            .map(|n| TaskSummary::empty(n.clone()))
            .collect();
        for entry in self.jobs.iter() {
            let job = entry.value();
            if let Some(summary) = summaries.iter_mut().find(|s| s.name == job.task_name) {
                summary.detail.add(job.status);
            }
        }
        Ok(summaries)
    }

    async fn save_job(&self, mut job: Job) -> anyhow::Result<Job> {
        if job.id.is_empty() {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            job.id = id.to_string();
        }
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn find_job_by_id(&self, id: &str) -> anyhow::Result<Option<Job>> {
        Ok(self.jobs.get(id).map(|e| e.value().clone()))
    }

    async fn update_all_status(
        &self,
        task_name: &str,
        current_statuses: &[JobStatus],
        new_status: JobStatus,
    ) -> anyhow::Result<()> {
        for mut entry in self.jobs.iter_mut() {
            let job = entry.value_mut();
            if job.task_name == task_name && current_statuses.contains(&job.status) {
                job.status = new_status;
                job.retries = 0;
            }
        }
        Ok(())
    }

    async fn clean_job(&self, task_name: &str) -> anyhow::Result<()> {
        self.jobs.retain(|_, job| {
            job.task_name != task_name || matches!(job.status, JobStatus::Queueing | JobStatus::Retrying)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_job_assigns_an_id_when_empty() {
        let store = MemoryStore::new();
        let job = Job::new("send_email", 3, vec![]);
        assert!(job.id.is_empty());
        let saved = store.save_job(job).await.unwrap();
        assert!(!saved.id.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn find_job_by_id_roundtrips() {
        let store = MemoryStore::new();
        let saved = store.save_job(Job::new("t", 1, vec![])).await.unwrap();
        let found = store.find_job_by_id(&saved.id).await.unwrap();
        assert_eq!(found.unwrap().id, saved.id);
    }

    #[tokio::test]
    async fn aggregate_all_task_job_zero_fills_unknown_tasks() {
        let store = MemoryStore::new();
        let filter = Filter {
            task_name_list: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let summaries = store.aggregate_all_task_job(&filter).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].total_jobs(), 0);
    }

    #[tokio::test]
    async fn update_all_status_resets_retries() {
        let store = MemoryStore::new();
        let mut job = Job::new("t", 3, vec![]);
        job.status = JobStatus::Failure;
        job.retries = 2;
        let saved = store.save_job(job).await.unwrap();
        store
            .update_all_status("t", &[JobStatus::Failure], JobStatus::Queueing)
            .await
            .unwrap();
        let reloaded = store.find_job_by_id(&saved.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Queueing);
        assert_eq!(reloaded.retries, 0);
    }

    #[tokio::test]
    async fn clean_job_keeps_pending_jobs_only() {
        let store = MemoryStore::new();
        let mut done = Job::new("t", 1, vec![]);
        done.status = JobStatus::Success;
        store.save_job(done).await.unwrap();
        store.save_job(Job::new("t", 1, vec![])).await.unwrap();
        store.clean_job("t").await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].status, JobStatus::Queueing);
    }
}
