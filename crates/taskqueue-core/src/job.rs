//! The durable [`Job`] record and the query [`Filter`] used against it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval used whenever a job is (re)armed without an explicit delay.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(0);

/// Status of a [`Job`]. Transitions are enforced by [`crate::retry::RetryPolicy`]
/// and the dispatcher, never set ad-hoc elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queueing,
    Retrying,
    Success,
    Failure,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queueing => "QUEUEING",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Stopped => "STOPPED",
        }
    }

    /// Statuses that still have an in-memory queue entry pending dispatch.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Queueing | JobStatus::Retrying)
    }

    /// Statuses that will never be dispatched again without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure | JobStatus::Stopped)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable unit of work. See `SPEC_FULL.md` §3 for the full invariant list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub task_name: String,
    pub arguments: Vec<u8>,
    pub max_retry: u32,
    pub retries: u32,
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    pub status: JobStatus,
    pub error: String,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Construct a brand-new job in `Queueing` state. `id` is left empty; the
    /// `Persistent` adapter assigns one on first save (invariant, §4.2).
    pub fn new(task_name: impl Into<String>, max_retry: u32, arguments: Vec<u8>) -> Self {
        Self {
            id: String::new(),
            task_name: task_name.into(),
            arguments,
            max_retry: max_retry.max(1),
            retries: 0,
            interval: DEFAULT_INTERVAL,
            status: JobStatus::Queueing,
            error: String::new(),
            trace_id: String::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Reset a terminal job back to a fresh dispatch-ready state (operator retry).
    pub fn reset_for_retry(&mut self) {
        self.retries = 0;
        self.status = JobStatus::Queueing;
        self.interval = DEFAULT_INTERVAL;
        self.error.clear();
        self.finished_at = None;
    }

    /// Derived `next_retry_at`, computed at read time per invariant §3.
    /// `None` for terminal statuses.
    pub fn next_retry_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.status.is_pending() {
            ChronoDuration::from_std(self.interval)
                .ok()
                .map(|d| now + d)
        } else {
            None
        }
    }

    /// Enforce invariant 2: `status == Success ⇒ error == ""`, applied on read
    /// so stale error text from a prior failed attempt never survives a success.
    pub fn normalized(mut self) -> Self {
        if self.status == JobStatus::Success {
            self.error.clear();
        }
        self
    }
}

/// Aggregated status counts for one task, returned by
/// [`crate::persistent::Persistent::aggregate_all_task_job`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queueing: i64,
    pub retrying: i64,
    pub success: i64,
    pub failure: i64,
    pub stopped: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.queueing + self.retrying + self.success + self.failure + self.stopped
    }

    pub fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queueing => self.queueing += 1,
            JobStatus::Retrying => self.retrying += 1,
            JobStatus::Success => self.success += 1,
            JobStatus::Failure => self.failure += 1,
            JobStatus::Stopped => self.stopped += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub name: String,
    pub detail: StatusCounts,
}

impl TaskSummary {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detail: StatusCounts::default(),
        }
    }

    pub fn total_jobs(&self) -> i64 {
        self.detail.total()
    }
}

/// Query filter shared by paging job lists and aggregating status counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    pub page: u32,
    pub limit: u32,
    pub task_name: Option<String>,
    pub task_name_list: Vec<String>,
    pub status: Vec<JobStatus>,
    pub search: Option<String>,
    pub show_all: bool,
}

impl Filter {
    pub fn for_task(task_name: impl Into<String>) -> Self {
        Self {
            page: 1,
            limit: 10,
            task_name: Some(task_name.into()),
            ..Default::default()
        }
    }

    /// Clamp page/limit into their documented bounds: `page >= 1`,
    /// `limit in [1, 10]`.
    pub fn normalized(mut self) -> Self {
        if self.page == 0 {
            self.page = 1;
        }
        self.limit = self.limit.clamp(1, 10);
        self
    }

    pub fn offset(&self) -> i64 {
        ((self.page.max(1) - 1) * self.limit) as i64
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(de)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_queueing_with_zero_retries() {
        let job = Job::new("send_email", 3, b"payload".to_vec());
        assert_eq!(job.status, JobStatus::Queueing);
        assert_eq!(job.retries, 0);
        assert!(job.id.is_empty());
    }

    #[test]
    fn max_retry_is_floored_at_one() {
        let job = Job::new("t", 0, vec![]);
        assert_eq!(job.max_retry, 1);
    }

    #[test]
    fn normalized_clears_error_on_success() {
        let mut job = Job::new("t", 1, vec![]);
        job.status = JobStatus::Success;
        job.error = "stale".into();
        assert_eq!(job.normalized().error, "");
    }

    #[test]
    fn filter_normalized_clamps_bounds() {
        let f = Filter {
            page: 0,
            limit: 99,
            ..Default::default()
        }
        .normalized();
        assert_eq!(f.page, 1);
        assert_eq!(f.limit, 10);
    }

    #[test]
    fn filter_offset_is_zero_on_first_page() {
        let f = Filter {
            page: 1,
            limit: 10,
            ..Default::default()
        };
        assert_eq!(f.offset(), 0);
        let f2 = Filter {
            page: 3,
            limit: 10,
            ..Default::default()
        };
        assert_eq!(f2.offset(), 20);
    }
}
