//! # taskqueue-core
//!
//! An in-process, persistent, multi-task job scheduler with live dashboard
//! broadcast. Per-task priority queues retry with backoff, a single
//! multiplex loop wakes whichever task's timer fires first, and every state
//! transition is pushed to subscribed dashboard clients.
//!
//! ## Architecture
//!
//! ```text
//!  add_job()/stop_job()/...
//!        │
//!        ▼
//!   Dispatcher ──────────────► Persistent (durable store)
//!        │     ▲                     │
//!        │     │ save/find           │
//!        ▼     │                     ▼
//!      Queue   └──────────────  SubscriberHub ──► dashboard clients
//!        │                           ▲
//!        │ push/pop                  │ broadcast after every
//!        ▼                           │ persisted transition
//!   Multiplexer ──── wait_for_tick() ┘
//!        ▲
//!        │ arm(worker_index, delay)
//!        │
//!   TaskRegistry (task_name ↔ worker_index ↔ handler)
//! ```
//!
//! One [`Scheduler`](scheduler::Scheduler) owns every collaborator above; a
//! cloneable [`SchedulerHandle`](scheduler::SchedulerHandle) is what calling
//! code (the dashboard crate, a binary's `main`) actually holds.
//!
//! ## Crate layout
//!
//! - [`job`] — the durable [`Job`](job::Job) record and [`Filter`](job::Filter).
//! - [`queue`] — in-memory per-task FIFO.
//! - [`persistent`] — the [`Persistent`](persistent::Persistent) store port.
//! - [`registry`] — task name ↔ handler ↔ worker index.
//! - [`multiplexer`] — the shared-wakeup timer schedule.
//! - [`retry`] — [`Outcome`](retry::Outcome) and [`RetryPolicy`](retry::RetryPolicy).
//! - [`dispatcher`] — one dispatch attempt + the operator control API.
//! - [`hub`] — dashboard subscriber fan-out.
//! - [`lock`] — distributed leadership port.
//! - [`tracer`] — opaque span port.
//! - [`clock`] — time source + id minting.
//! - [`config`] — `SchedulerConfig::from_env()`.
//! - [`scheduler`] — lifecycle: boot, lock gating, run loop, shutdown.
//! - [`error`] — [`SchedulerError`](error::SchedulerError).

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod job;
pub mod lock;
pub mod multiplexer;
pub mod persistent;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod tracer;

pub use config::SchedulerConfig;
pub use dispatcher::Dispatcher;
pub use error::{Result, SchedulerError};
pub use hub::{JobListMessage, SubscriberHub, TaskListMessage};
pub use job::{Filter, Job, JobStatus, StatusCounts, TaskSummary};
pub use persistent::Persistent;
pub use registry::{FromFn, Handler, TaskRegistry};
pub use retry::{Outcome, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerHandle};
