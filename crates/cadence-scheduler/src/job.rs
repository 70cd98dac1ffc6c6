//! The unit of work attached to a task.
//!
//! Jobs return `Result` so that outcomes are observable through
//! [`ExecutionReport`](crate::types::ExecutionReport)s, but callers never
//! receive a job's result: execution is fire-and-forget.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Error returned by a job. Logged and reported; never cancels the task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

pub type JobResult = std::result::Result<(), JobError>;

/// Per-execution information handed to the job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub task_id: String,
    pub run_id: Uuid,
    pub run_number: u64,
    /// Instant the firing was scheduled for.
    pub scheduled_at: DateTime<Utc>,
    /// Instant a worker actually started it.
    pub fired_at: DateTime<Utc>,
}

#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self, ctx: JobContext) -> JobResult;
}

/// Adapts an async closure into a [`Job`].
pub struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> JobResult {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a shareable job.
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn Job>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    Arc::new(FnJob(f))
}

/// Default job for tasks registered through the adapter surface: it only
/// records that the firing happened.
#[derive(Debug, Clone)]
pub struct LogJob {
    kind: &'static str,
}

impl LogJob {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Job for LogJob {
    async fn run(&self, ctx: JobContext) -> JobResult {
        info!(
            task_id = %ctx.task_id,
            run_id = %ctx.run_id,
            run = ctx.run_number,
            "{}Task[{}] executed at {}",
            self.kind,
            ctx.task_id,
            ctx.fired_at.to_rfc3339()
        );
        Ok(())
    }
}
