//! `cadence-scheduler`: in-process scheduler for named recurring jobs.
//!
//! # Overview
//!
//! Callers register jobs at runtime through a [`SchedulerHandle`]. The
//! [`TaskRegistry`](registry::TaskRegistry) keeps every task together with a
//! time-ordered wait structure of pending firings; the
//! [`SchedulerEngine`] loop sleeps until the earliest firing, hands due jobs
//! to a bounded [`WorkerPool`](pool::WorkerPool) and re-arms the next firing.
//!
//! # Trigger kinds
//!
//! | Kind         | Next fire time                                         |
//! |--------------|--------------------------------------------------------|
//! | `Cron`       | Next match of a 6-field expression (seconds first), UTC |
//! | `FixedRate`  | Previous *scheduled* time + period, on a fixed grid    |
//! | `FixedDelay` | Previous *completion* time + period                    |
//!
//! Jobs are fire-and-forget. Their outcomes are logged and published as
//! [`ExecutionReport`]s through [`SchedulerHandle::subscribe`].

pub mod clock;
pub mod cron;
pub mod engine;
pub mod error;
pub mod job;
pub mod pool;
pub mod registry;
pub mod trigger;
pub mod types;

pub use cadence_core::TriggerSpec;
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use cron::CronSchedule;
pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use job::{job_fn, Job, JobContext, JobError, JobResult, LogJob};
pub use trigger::Trigger;
pub use types::{ExecutionOutcome, ExecutionReport, PoolStats, TaskInfo, TaskStatus};
