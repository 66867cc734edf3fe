//! Subscriber Hub (§4.5): dashboard clients for task-list and per-task
//! job-list streams, broadcast after every persisted state change.

use crate::error::{Result, SchedulerError};
use crate::job::{Filter, JobStatus, StatusCounts, TaskSummary};
use crate::persistent::Persistent;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default lifetime of a subscriber stream before it is force-closed (§4.5).
pub const DEFAULT_AUTO_REMOVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Bounded outbound channel capacity; sends beyond this are dropped rather
/// than blocking the broadcaster (§4.5, §9).
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct MetaTaskList {
    pub is_close_session: bool,
}

#[derive(Debug, Clone)]
pub struct TaskListMessage {
    pub meta: MetaTaskList,
    pub data: Vec<TaskSummary>,
}

impl TaskListMessage {
    pub fn close() -> Self {
        Self {
            meta: MetaTaskList {
                is_close_session: true,
            },
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetaJobList {
    pub page: u32,
    pub limit: u32,
    pub total_records: i64,
    pub total_pages: i64,
    pub is_close_session: bool,
    pub detail: StatusCounts,
}

#[derive(Debug, Clone)]
pub struct JobListMessage {
    pub meta: MetaJobList,
    pub data: Vec<crate::job::Job>,
}

impl JobListMessage {
    pub fn close() -> Self {
        Self {
            meta: MetaJobList {
                is_close_session: true,
                ..Default::default()
            },
            data: Vec::new(),
        }
    }
}

struct JobListSubscription {
    sender: mpsc::Sender<JobListMessage>,
    filter: Filter,
}

/// Dashboard clients for task-list + per-task job-list streams.
#[derive(Default)]
pub struct SubscriberHub {
    task_list: DashMap<String, mpsc::Sender<TaskListMessage>>,
    job_list: DashMap<String, JobListSubscription>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_list_subscriber_count(&self) -> usize {
        self.task_list.len()
    }

    pub fn job_list_subscriber_count(&self) -> usize {
        self.job_list.len()
    }

    /// Client ids of every live TaskList subscriber, for the `tagline` query.
    pub fn task_list_client_ids(&self) -> Vec<String> {
        self.task_list.iter().map(|e| e.key().clone()).collect()
    }

    /// Client ids of every live JobList subscriber, for the `tagline` query.
    pub fn job_list_client_ids(&self) -> Vec<String> {
        self.job_list.iter().map(|e| e.key().clone()).collect()
    }

    /// Register a new TaskList subscriber. Fails with `ClientLimitExceeded`
    /// if `max_client_subscribers` is already reached.
    pub fn register_task_list(
        &self,
        client_id: impl Into<String>,
        max_client_subscribers: usize,
    ) -> Result<mpsc::Receiver<TaskListMessage>> {
        if self.task_list.len() >= max_client_subscribers {
            return Err(SchedulerError::ClientLimitExceeded);
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.task_list.insert(client_id.into(), tx);
        Ok(rx)
    }

    pub fn remove_task_list(&self, client_id: &str) {
        self.task_list.remove(client_id);
    }

    /// Register a new JobList subscriber scoped to `task_name` + `filter`.
    pub fn register_job_list(
        &self,
        client_id: impl Into<String>,
        filter: Filter,
        max_client_subscribers: usize,
    ) -> Result<mpsc::Receiver<JobListMessage>> {
        if self.job_list.len() >= max_client_subscribers {
            return Err(SchedulerError::ClientLimitExceeded);
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.job_list.insert(
            client_id.into(),
            JobListSubscription {
                sender: tx,
                filter,
            },
        );
        Ok(rx)
    }

    pub fn remove_job_list(&self, client_id: &str) {
        self.job_list.remove(client_id);
    }

    /// Recompute the task-list summary across `task_names` and push it to
    /// every TaskList subscriber. Non-blocking best-effort (§4.5): a full or
    /// closed channel is skipped, never awaited.
    pub async fn broadcast_task_list(&self, persistent: &dyn Persistent, task_names: &[String]) {
        if self.task_list.is_empty() {
            return;
        }
        let filter = Filter {
            task_name_list: task_names.to_vec(),
            show_all: true,
            ..Default::default()
        };
        let data = match persistent.aggregate_all_task_job(&filter).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "aggregate_all_task_job failed during broadcast");
                task_names.iter().map(|n| TaskSummary::empty(n.clone())).collect()
            }
        };
        let message = TaskListMessage {
            meta: MetaTaskList::default(),
            data,
        };
        let mut dead = Vec::new();
        for entry in self.task_list.iter() {
            if entry.value().try_send(message.clone()).is_err() {
                dead.push(entry.key().clone());
            }
        }
        for client_id in dead {
            self.task_list.remove(&client_id);
        }
    }

    /// Recompute and push the filtered page to every JobList subscriber
    /// whose filter targets `task_name`.
    pub async fn broadcast_job_list(&self, persistent: &dyn Persistent, task_name: &str) {
        let matching: Vec<(String, Filter)> = self
            .job_list
            .iter()
            .filter(|e| e.value().filter.task_name.as_deref() == Some(task_name))
            .map(|e| (e.key().clone(), e.value().filter.clone()))
            .collect();

        for (client_id, filter) in matching {
            let jobs = persistent.find_all_job(&filter).await.unwrap_or_default();
            let summary_filter = Filter {
                task_name_list: vec![task_name.to_string()],
                ..Default::default()
            };
            let totals = persistent
                .aggregate_all_task_job(&summary_filter)
                .await
                .unwrap_or_default();
            let detail = totals.first().map(|t| t.detail).unwrap_or_default();
            let total_records = detail.total();
            let limit = filter.limit.max(1) as i64;
            let total_pages = (total_records + limit - 1) / limit;

            let message = JobListMessage {
                meta: MetaJobList {
                    page: filter.page,
                    limit: filter.limit,
                    total_records,
                    total_pages,
                    is_close_session: false,
                    detail,
                },
                data: jobs,
            };
            if let Some(sub) = self.job_list.get(&client_id) {
                if sub.sender.try_send(message).is_err() {
                    drop(sub);
                    self.job_list.remove(&client_id);
                }
            }
        }
    }

    /// Signal every active subscriber to close, then drop them (§4.4
    /// `clear_all_client_subscribers`).
    pub async fn clear_all(&self) {
        for entry in self.task_list.iter() {
            let _ = entry.value().try_send(TaskListMessage::close());
        }
        self.task_list.clear();

        for entry in self.job_list.iter() {
            let _ = entry.value().sender.try_send(JobListMessage::close());
        }
        self.job_list.clear();
    }
}

/// Returns a zero-filled [`TaskSummary`] vector, used as a failure-mode
/// fallback when the store errors mid-aggregation (§4.2 failure mode).
pub fn zero_filled_summaries(task_names: &[String]) -> Vec<TaskSummary> {
    task_names.iter().map(|n| TaskSummary::empty(n.clone())).collect()
}

/// Convenience used by callers constructing a status filter for `RetryAllJob`
/// / `CleanJob`-adjacent paging (§4.4).
pub fn failed_or_stopped_filter(task_name: &str, page: u32) -> Filter {
    Filter {
        page,
        limit: 10,
        task_name: Some(task_name.to_string()),
        status: vec![JobStatus::Failure, JobStatus::Stopped],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use async_trait::async_trait;

    #[derive(Default)]
    struct FakePersistent {
        jobs: Vec<Job>,
    }

    #[async_trait]
    impl Persistent for FakePersistent {
        async fn find_all_job(&self, _filter: &Filter) -> anyhow::Result<Vec<Job>> {
            Ok(self.jobs.clone())
        }
        async fn count_all_job(&self, _filter: &Filter) -> anyhow::Result<i64> {
            Ok(self.jobs.len() as i64)
        }
        async fn aggregate_all_task_job(&self, filter: &Filter) -> anyhow::Result<Vec<TaskSummary>> {
            Ok(zero_filled_summaries(&filter.task_name_list))
        }
        async fn save_job(&self, job: Job) -> anyhow::Result<Job> {
            Ok(job)
        }
        async fn find_job_by_id(&self, _id: &str) -> anyhow::Result<Option<Job>> {
            Ok(None)
        }
        async fn update_all_status(
            &self,
            _task_name: &str,
            _current: &[JobStatus],
            _new: JobStatus,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn clean_job(&self, _task_name: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn client_limit_is_enforced() {
        let hub = SubscriberHub::new();
        let _a = hub.register_task_list("a", 1).unwrap();
        let err = hub.register_task_list("b", 1).unwrap_err();
        assert!(matches!(err, SchedulerError::ClientLimitExceeded));
    }

    #[test]
    fn existing_streams_survive_a_rejected_subscribe() {
        let hub = SubscriberHub::new();
        let _a = hub.register_task_list("a", 1).unwrap();
        assert!(hub.register_task_list("b", 1).is_err());
        assert_eq!(hub.task_list_subscriber_count(), 1);
    }

    #[test]
    fn remove_frees_a_slot() {
        let hub = SubscriberHub::new();
        let _a = hub.register_task_list("a", 1).unwrap();
        hub.remove_task_list("a");
        assert!(hub.register_task_list("b", 1).is_ok());
    }

    #[tokio::test]
    async fn broadcast_reaches_registered_subscriber() {
        let hub = SubscriberHub::new();
        let mut rx = hub.register_task_list("a", 10).unwrap();
        let persistent = FakePersistent::default();
        hub.broadcast_task_list(&persistent, &["email".to_string()])
            .await;
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.data.len(), 1);
        assert_eq!(msg.data[0].name, "email");
    }

    #[tokio::test]
    async fn clear_all_sends_close_and_drops_subscribers() {
        let hub = SubscriberHub::new();
        let mut rx = hub.register_task_list("a", 10).unwrap();
        hub.clear_all().await;
        let msg = rx.try_recv().unwrap();
        assert!(msg.meta.is_close_session);
        assert_eq!(hub.task_list_subscriber_count(), 0);
    }
}
