//! PostgreSQL implementation of the task queue worker's [`Persistent`] port.
//!
//! A thin `#[async_trait]` adapter over a `sqlx::PgPool`, runtime-built
//! queries (no compile-time `query!` macros, so this crate never needs a
//! live database at build time), and the schema documented right here
//! rather than in a separate design doc.
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE task_queue_worker_jobs (
//!     id           TEXT PRIMARY KEY,
//!     task_name    TEXT NOT NULL,
//!     arguments    BYTEA NOT NULL,
//!     max_retry    INTEGER NOT NULL,
//!     retries      INTEGER NOT NULL DEFAULT 0,
//!     interval_ms  BIGINT NOT NULL DEFAULT 0,
//!     status       TEXT NOT NULL,
//!     error        TEXT NOT NULL DEFAULT '',
//!     trace_id     TEXT NOT NULL DEFAULT '',
//!     created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     finished_at  TIMESTAMPTZ
//! );
//! ```
//!
//! Migrations live under `migrations/` and are embedded via
//! [`sqlx::migrate!`]; call [`PgPersistent::migrate`] once at boot.

use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder, Row};
use taskqueue_core::job::{Filter, Job, JobStatus, TaskSummary};
use taskqueue_core::persistent::Persistent;
use std::time::Duration;

fn status_str(status: JobStatus) -> &'static str {
    status.as_str()
}

fn parse_status(raw: &str) -> JobStatus {
    match raw {
        "RETRYING" => JobStatus::Retrying,
        "SUCCESS" => JobStatus::Success,
        "FAILURE" => JobStatus::Failure,
        "STOPPED" => JobStatus::Stopped,
        _ => JobStatus::Queueing,
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Job {
    let interval_ms: i64 = row.get("interval_ms");
    Job {
        id: row.get("id"),
        task_name: row.get("task_name"),
        arguments: row.get("arguments"),
        max_retry: row.get::<i32, _>("max_retry") as u32,
        retries: row.get::<i32, _>("retries") as u32,
        interval: Duration::from_millis(interval_ms.max(0) as u64),
        status: parse_status(row.get::<String, _>("status").as_str()),
        error: row.get("error"),
        trace_id: row.get("trace_id"),
        created_at: row.get("created_at"),
        finished_at: row.get("finished_at"),
    }
}

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgPersistent {
    pool: PgPool,
}

impl PgPersistent {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and run the embedded migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations. Called automatically by [`Self::connect`].
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn push_filter_clauses<'a>(builder: &mut QueryBuilder<'a, sqlx::Postgres>, filter: &'a Filter) {
        let mut any = false;
        let mut clause = |builder: &mut QueryBuilder<'a, sqlx::Postgres>, any: &mut bool| {
            builder.push(if *any { " AND " } else { " WHERE " });
            *any = true;
        };

        if let Some(task_name) = &filter.task_name {
            clause(builder, &mut any);
            builder.push("task_name = ").push_bind(task_name);
        }
        if !filter.task_name_list.is_empty() {
            clause(builder, &mut any);
            builder
                .push("task_name = ANY(")
                .push_bind(filter.task_name_list.clone())
                .push(")");
        }
        if !filter.status.is_empty() {
            let statuses: Vec<&'static str> = filter.status.iter().map(|s| status_str(*s)).collect();
            clause(builder, &mut any);
            builder.push("status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(search) = &filter.search {
            if !search.is_empty() {
                clause(builder, &mut any);
                let pattern = format!("%{search}%");
                builder
                    .push("(id LIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR convert_from(arguments, 'UTF8') LIKE ")
                    .push_bind(pattern)
                    .push(")");
            }
        }
    }
}

#[async_trait]
impl Persistent for PgPersistent {
    async fn find_all_job(&self, filter: &Filter) -> anyhow::Result<Vec<Job>> {
        let mut builder = QueryBuilder::new("SELECT * FROM task_queue_worker_jobs");
        Self::push_filter_clauses(&mut builder, filter);
        builder.push(" ORDER BY created_at DESC");
        if !filter.show_all {
            let filter = filter.clone().normalized();
            builder
                .push(" LIMIT ")
                .push_bind(filter.limit as i64)
                .push(" OFFSET ")
                .push_bind(filter.offset());
        }
        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_job).collect())
    }

    async fn count_all_job(&self, filter: &Filter) -> anyhow::Result<i64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) AS count FROM task_queue_worker_jobs");
        Self::push_filter_clauses(&mut builder, filter);
        let row = builder.build().fetch_one(&self.pool).await?;
        Ok(row.get("count"))
    }

    async fn aggregate_all_task_job(&self, filter: &Filter) -> anyhow::Result<Vec<TaskSummary>> {
        let mut summaries: Vec<TaskSummary> = filter
            .task_name_list
            .iter()
            .map(|n| TaskSummary::empty(n.clone()))
            .collect();
        if filter.task_name_list.is_empty() {
            return Ok(summaries);
        }

        let rows = sqlx::query(
            "SELECT task_name, status, COUNT(*) AS count \
             FROM task_queue_worker_jobs \
             WHERE task_name = ANY($1) \
             GROUP BY task_name, status",
        )
        .bind(&filter.task_name_list)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let task_name: String = row.get("task_name");
            let status = parse_status(row.get::<String, _>("status").as_str());
            let count: i64 = row.get("count");
            if let Some(summary) = summaries.iter_mut().find(|s| s.name == task_name) {
                match status {
                    JobStatus::Queueing => summary.detail.queueing += count,
                    JobStatus::Retrying => summary.detail.retrying += count,
                    JobStatus::Success => summary.detail.success += count,
                    JobStatus::Failure => summary.detail.failure += count,
                    JobStatus::Stopped => summary.detail.stopped += count,
                }
            }
        }
        Ok(summaries)
    }

    async fn save_job(&self, mut job: Job) -> anyhow::Result<Job> {
        if job.id.is_empty() {
            job.id = uuid::Uuid::new_v4().to_string();
        }
        sqlx::query(
            "INSERT INTO task_queue_worker_jobs \
                (id, task_name, arguments, max_retry, retries, interval_ms, status, error, trace_id, created_at, finished_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET \
                task_name = EXCLUDED.task_name, \
                arguments = EXCLUDED.arguments, \
                max_retry = EXCLUDED.max_retry, \
                retries = EXCLUDED.retries, \
                interval_ms = EXCLUDED.interval_ms, \
                status = EXCLUDED.status, \
                error = EXCLUDED.error, \
                trace_id = EXCLUDED.trace_id, \
                finished_at = EXCLUDED.finished_at",
        )
        .bind(&job.id)
        .bind(&job.task_name)
        .bind(&job.arguments)
        .bind(job.max_retry as i32)
        .bind(job.retries as i32)
        .bind(job.interval.as_millis() as i64)
        .bind(status_str(job.status))
        .bind(&job.error)
        .bind(&job.trace_id)
        .bind(job.created_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    async fn find_job_by_id(&self, id: &str) -> anyhow::Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM task_queue_worker_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_job))
    }

    async fn update_all_status(
        &self,
        task_name: &str,
        current_statuses: &[JobStatus],
        new_status: JobStatus,
    ) -> anyhow::Result<()> {
        let current: Vec<&'static str> = current_statuses.iter().map(|s| status_str(*s)).collect();
        sqlx::query(
            "UPDATE task_queue_worker_jobs \
             SET status = $1, retries = 0 \
             WHERE task_name = $2 AND status = ANY($3)",
        )
        .bind(status_str(new_status))
        .bind(task_name)
        .bind(current)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clean_job(&self, task_name: &str) -> anyhow::Result<()> {
        sqlx::query(
            "DELETE FROM task_queue_worker_jobs \
             WHERE task_name = $1 AND status NOT IN ('QUEUEING', 'RETRYING')",
        )
        .bind(task_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_str() {
        for status in [
            JobStatus::Queueing,
            JobStatus::Retrying,
            JobStatus::Success,
            JobStatus::Failure,
            JobStatus::Stopped,
        ] {
            assert_eq!(parse_status(status_str(status)), status);
        }
    }

    #[test]
    fn unknown_status_text_falls_back_to_queueing() {
        assert_eq!(parse_status("garbage"), JobStatus::Queueing);
    }
}
