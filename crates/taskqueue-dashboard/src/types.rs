//! GraphQL-facing mirrors of the `taskqueue-core` domain types.
//!
//! Kept as a thin translation layer rather than deriving `SimpleObject`
//! directly on the core types, so `taskqueue-core` never depends on
//! `async-graphql`.

use async_graphql::{Enum, SimpleObject};
use chrono::{DateTime, Utc};
use taskqueue_core::{Job, JobStatus, StatusCounts, TaskSummary};

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum JobStatusGQL {
    Queueing,
    Retrying,
    Success,
    Failure,
    Stopped,
}

impl From<JobStatus> for JobStatusGQL {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queueing => JobStatusGQL::Queueing,
            JobStatus::Retrying => JobStatusGQL::Retrying,
            JobStatus::Success => JobStatusGQL::Success,
            JobStatus::Failure => JobStatusGQL::Failure,
            JobStatus::Stopped => JobStatusGQL::Stopped,
        }
    }
}

impl From<JobStatusGQL> for JobStatus {
    fn from(status: JobStatusGQL) -> Self {
        match status {
            JobStatusGQL::Queueing => JobStatus::Queueing,
            JobStatusGQL::Retrying => JobStatus::Retrying,
            JobStatusGQL::Success => JobStatus::Success,
            JobStatusGQL::Failure => JobStatus::Failure,
            JobStatusGQL::Stopped => JobStatus::Stopped,
        }
    }
}

#[derive(SimpleObject, Clone)]
pub struct JobGQL {
    pub id: String,
    pub task_name: String,
    pub arguments: String,
    pub max_retry: i32,
    pub retries: i32,
    pub interval_ms: i64,
    pub status: JobStatusGQL,
    pub error: String,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobGQL {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            task_name: job.task_name,
            arguments: String::from_utf8_lossy(&job.arguments).into_owned(),
            max_retry: job.max_retry as i32,
            retries: job.retries as i32,
            interval_ms: job.interval.as_millis() as i64,
            status: job.status.into(),
            error: job.error,
            trace_id: job.trace_id,
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(SimpleObject, Clone, Copy, Default)]
pub struct StatusCountsGQL {
    pub queueing: i64,
    pub retrying: i64,
    pub success: i64,
    pub failure: i64,
    pub stopped: i64,
}

impl From<StatusCounts> for StatusCountsGQL {
    fn from(counts: StatusCounts) -> Self {
        Self {
            queueing: counts.queueing,
            retrying: counts.retrying,
            success: counts.success,
            failure: counts.failure,
            stopped: counts.stopped,
        }
    }
}

#[derive(SimpleObject, Clone)]
pub struct TaskSummaryGQL {
    pub name: String,
    pub detail: StatusCountsGQL,
    pub total_jobs: i64,
}

impl From<TaskSummary> for TaskSummaryGQL {
    fn from(summary: TaskSummary) -> Self {
        Self {
            total_jobs: summary.total_jobs(),
            name: summary.name,
            detail: summary.detail.into(),
        }
    }
}

#[derive(SimpleObject, Clone, Default)]
pub struct MetaTaskListGQL {
    pub is_close_session: bool,
}

#[derive(SimpleObject, Clone)]
pub struct TaskListResolverGQL {
    pub meta: MetaTaskListGQL,
    pub data: Vec<TaskSummaryGQL>,
}

impl From<taskqueue_core::TaskListMessage> for TaskListResolverGQL {
    fn from(message: taskqueue_core::TaskListMessage) -> Self {
        Self {
            meta: MetaTaskListGQL {
                is_close_session: message.meta.is_close_session,
            },
            data: message.data.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(SimpleObject, Clone, Default)]
pub struct MetaJobListGQL {
    pub page: i32,
    pub limit: i32,
    pub total_records: i64,
    pub total_pages: i64,
    pub is_close_session: bool,
    pub detail: StatusCountsGQL,
}

#[derive(SimpleObject, Clone)]
pub struct JobListResolverGQL {
    pub meta: MetaJobListGQL,
    pub data: Vec<JobGQL>,
}

impl From<taskqueue_core::JobListMessage> for JobListResolverGQL {
    fn from(message: taskqueue_core::JobListMessage) -> Self {
        Self {
            meta: MetaJobListGQL {
                page: message.meta.page as i32,
                limit: message.meta.limit as i32,
                total_records: message.meta.total_records,
                total_pages: message.meta.total_pages,
                is_close_session: message.meta.is_close_session,
                detail: message.meta.detail.into(),
            },
            data: message.data.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(SimpleObject, Clone)]
pub struct TaglineResolverGQL {
    pub banner: String,
    pub tagline: String,
    pub version: String,
    pub task_list_client_subscribers: Vec<String>,
    pub job_list_client_subscribers: Vec<String>,
}
