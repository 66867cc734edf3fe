//! The GraphQL schema (§6): `tagline` query, the operator control
//! mutations, and the two live subscriptions.
//!
//! Resolvers are a thin transport shim — every mutation and subscription
//! delegates straight to `taskqueue_core::scheduler::SchedulerHandle`
//! (mirrors `rootResolver` in the original `graphql_resolver.go`, which is
//! likewise a thin wrapper over the package-level scheduler functions).

use crate::types::{
    JobListResolverGQL, JobStatusGQL, TaglineResolverGQL, TaskListResolverGQL,
};
use async_graphql::{Context, Object, Result, Schema, Subscription};
use futures::Stream;
use std::time::Duration;
use taskqueue_core::{Filter, JobStatus, SchedulerError, SchedulerHandle};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Derived from the subscriber's `Sec-WebSocket-Key` header (§4.5).
#[derive(Clone, Debug)]
pub struct ClientId(pub String);

/// Lifetime of a subscription stream before it is force-closed (§4.5).
const AUTO_REMOVE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Outbound channel capacity between the hub forwarder and the GraphQL
/// transport; matches `hub::SubscriberHub`'s own bound.
const FORWARD_CHANNEL_CAPACITY: usize = 16;

pub type DashboardSchema = Schema<QueryRoot, MutationRoot, SubscriptionRoot>;

pub fn build_schema(scheduler: SchedulerHandle, config: taskqueue_core::SchedulerConfig) -> DashboardSchema {
    Schema::build(QueryRoot, MutationRoot, SubscriptionRoot)
        .data(scheduler)
        .data(config)
        .finish()
}

fn scheduler_error_to_graphql(err: SchedulerError) -> async_graphql::Error {
    async_graphql::Error::new(err.to_string())
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn tagline(&self, ctx: &Context<'_>) -> Result<TaglineResolverGQL> {
        let scheduler = ctx.data::<SchedulerHandle>()?;
        Ok(TaglineResolverGQL {
            banner: "Task Queue Worker Dashboard".to_string(),
            tagline: "Task Queue Worker Dashboard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            task_list_client_subscribers: scheduler.task_list_client_ids(),
            job_list_client_subscribers: scheduler.job_list_client_ids(),
        })
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn add_job(
        &self,
        ctx: &Context<'_>,
        task_name: String,
        max_retry: i32,
        args: String,
    ) -> Result<String> {
        let scheduler = ctx.data::<SchedulerHandle>()?;
        scheduler
            .add_job(&task_name, max_retry.max(1) as u32, args.into_bytes())
            .await
            .map_err(scheduler_error_to_graphql)?;
        Ok("ok".to_string())
    }

    async fn stop_job(&self, ctx: &Context<'_>, job_id: String) -> Result<String> {
        let scheduler = ctx.data::<SchedulerHandle>()?;
        scheduler
            .stop_job(&job_id)
            .await
            .map_err(scheduler_error_to_graphql)?;
        Ok(format!("Success stop job {job_id}"))
    }

    async fn stop_all_job(&self, ctx: &Context<'_>, task_name: String) -> Result<String> {
        let scheduler = ctx.data::<SchedulerHandle>()?;
        scheduler
            .stop_all_job(&task_name)
            .await
            .map_err(scheduler_error_to_graphql)?;
        Ok(format!("Success stop all job in task {task_name}"))
    }

    async fn retry_job(&self, ctx: &Context<'_>, job_id: String) -> Result<String> {
        let scheduler = ctx.data::<SchedulerHandle>()?;
        scheduler
            .retry_job(&job_id)
            .await
            .map_err(scheduler_error_to_graphql)?;
        Ok(format!("Success retry job {job_id}"))
    }

    async fn retry_all_job(&self, ctx: &Context<'_>, task_name: String) -> Result<String> {
        let scheduler = ctx.data::<SchedulerHandle>()?;
        scheduler
            .retry_all_job(&task_name)
            .await
            .map_err(scheduler_error_to_graphql)?;
        Ok(format!("Success retry all failure job in task {task_name}"))
    }

    async fn clean_job(&self, ctx: &Context<'_>, task_name: String) -> Result<String> {
        let scheduler = ctx.data::<SchedulerHandle>()?;
        scheduler
            .clean_job(&task_name)
            .await
            .map_err(scheduler_error_to_graphql)?;
        Ok(format!("Success clean all job in task {task_name}"))
    }

    async fn clear_all_client_subscriber(&self, ctx: &Context<'_>) -> Result<String> {
        let scheduler = ctx.data::<SchedulerHandle>()?;
        scheduler.clear_all_client_subscribers().await;
        Ok("Success clear all client subscriber".to_string())
    }
}

pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    async fn listen_task(
        &self,
        ctx: &Context<'_>,
    ) -> Result<impl Stream<Item = TaskListResolverGQL>> {
        let scheduler = ctx.data::<SchedulerHandle>()?.clone();
        let client_id = ctx
            .data_opt::<ClientId>()
            .map(|c| c.0.clone())
            .unwrap_or_else(|| "anonymous".to_string());

        let mut rx = scheduler
            .subscribe_task_list(client_id.clone(), dashboard_max_client(ctx))
            .map_err(scheduler_error_to_graphql)?;
        scheduler.broadcast_task_list().await;

        let (out_tx, out_rx) = mpsc::channel(FORWARD_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(AUTO_REMOVE_AFTER);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut deadline => {
                        let _ = out_tx.send(taskqueue_core::TaskListMessage::close().into()).await;
                        break;
                    }
                    message = rx.recv() => {
                        match message {
                            Some(message) => {
                                let close = message.meta.is_close_session;
                                if out_tx.send(message.into()).await.is_err() || close {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            scheduler.unsubscribe_task_list(&client_id);
        });

        Ok(ReceiverStream::new(out_rx))
    }

    #[allow(clippy::too_many_arguments)]
    async fn listen_task_job_detail(
        &self,
        ctx: &Context<'_>,
        task_name: String,
        page: i32,
        limit: i32,
        search: Option<String>,
        status: Option<Vec<JobStatusGQL>>,
    ) -> Result<impl Stream<Item = JobListResolverGQL>> {
        let scheduler = ctx.data::<SchedulerHandle>()?.clone();
        let client_id = ctx
            .data_opt::<ClientId>()
            .map(|c| c.0.clone())
            .unwrap_or_else(|| "anonymous".to_string());

        let filter = Filter {
            page: if page <= 0 { 1 } else { page as u32 },
            limit: if limit <= 0 { 10 } else { (limit as u32).min(10) },
            task_name: Some(task_name.clone()),
            search,
            status: status
                .unwrap_or_default()
                .into_iter()
                .map(JobStatus::from)
                .collect(),
            ..Default::default()
        };

        let max_client_subscribers = scheduler
            .max_client_subscribers_for(&task_name)
            .unwrap_or(dashboard_max_client(ctx));
        let mut rx = scheduler
            .subscribe_job_list(client_id.clone(), filter, max_client_subscribers)
            .map_err(scheduler_error_to_graphql)?;
        scheduler.broadcast_job_list(&task_name).await;

        let (out_tx, out_rx) = mpsc::channel(FORWARD_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(AUTO_REMOVE_AFTER);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut deadline => {
                        let _ = out_tx.send(taskqueue_core::JobListMessage::close().into()).await;
                        break;
                    }
                    message = rx.recv() => {
                        match message {
                            Some(message) => {
                                let close = message.meta.is_close_session;
                                if out_tx.send(message.into()).await.is_err() || close {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            scheduler.unsubscribe_job_list(&client_id);
        });

        Ok(ReceiverStream::new(out_rx))
    }
}

/// Falls back to the documented default when the caller embedded no
/// `SchedulerConfig` in the schema's context data.
fn dashboard_max_client(ctx: &Context<'_>) -> usize {
    ctx.data_opt::<taskqueue_core::SchedulerConfig>()
        .map(|c| c.dashboard_max_client)
        .unwrap_or(10)
}
