//! The handler-returned [`Outcome`] sum type and the [`RetryPolicy`] that
//! turns it into the job's next persisted state.
//!
//! `Outcome` replaces the source's `Retrier`-or-plain-`error` duality with a
//! single tagged variant (§9 design note).

use crate::job::{Job, JobStatus};
use std::time::Duration;

/// What a handler tells the scheduler to do next.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The job succeeded.
    Done,
    /// The job failed but should be retried after `delay`. `message` becomes
    /// the job's `error` field. The ceiling on retries is always
    /// `job.max_retry`; `delay` is advisory only (§9 open question).
    Retry { delay: Duration, message: String },
    /// The job failed in a way that consumes a retry attempt exactly like
    /// `Retry`, but without an explicit delay hint — the job's current
    /// `interval` is reused. This is what an ordinary `Err` from a handler
    /// becomes.
    Fatal { message: String },
}

impl Outcome {
    pub fn retry(delay: Duration, message: impl Into<String>) -> Self {
        Outcome::Retry {
            delay,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Outcome::Fatal {
            message: message.into(),
        }
    }

    /// Build the panic path outcome (§7: `Panic` recovered at the dispatch
    /// worker boundary, converted to `HandlerError`/`Fatal`).
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Outcome::fatal(format!("panic: {message}"))
    }
}

/// Applies an [`Outcome`] to a job, producing its next persisted state
/// in-place. Returns `true` if the job should be re-pushed onto the queue.
pub struct RetryPolicy;

impl RetryPolicy {
    /// Apply `outcome` to `job`, mutating its status/retries/error/interval
    /// per the state machine in §4.3. Returns whether the job must be
    /// re-enqueued (i.e. ended up `Queueing`).
    pub fn apply(job: &mut Job, outcome: Outcome, now: chrono::DateTime<chrono::Utc>) -> bool {
        match outcome {
            Outcome::Done => {
                job.status = JobStatus::Success;
                job.finished_at = Some(now);
                job.error.clear();
                false
            }
            Outcome::Retry { delay, message } => Self::retry_or_fail(job, delay, message, now),
            Outcome::Fatal { message } => {
                let delay = job.interval;
                Self::retry_or_fail(job, delay, message, now)
            }
        }
    }

    fn retry_or_fail(
        job: &mut Job,
        delay: Duration,
        message: String,
        now: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        job.retries += 1;
        job.error = message;
        if job.retries >= job.max_retry {
            job.status = JobStatus::Failure;
            job.finished_at = Some(now);
            false
        } else {
            job.status = JobStatus::Queueing;
            job.interval = delay;
            true
        }
    }
}
