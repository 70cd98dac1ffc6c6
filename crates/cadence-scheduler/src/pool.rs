//! Fixed-size worker pool fed through one shared queue.
//!
//! Workers own no task metadata: they run a [`WorkItem`], turn the result into
//! an [`ExecutionReport`] and send it back to the driver. A job that panics or
//! returns an error is logged here and never takes the worker down.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::job::{Job, JobContext};
use crate::types::{ExecutionOutcome, ExecutionReport, PoolStats};

/// One firing handed from the driver to the pool.
pub struct WorkItem {
    pub task_id: String,
    pub epoch: u64,
    pub run_number: u64,
    pub scheduled_at: DateTime<Utc>,
    pub job: Arc<dyn Job>,
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("task_id", &self.task_id)
            .field("epoch", &self.epoch)
            .field("run_number", &self.run_number)
            .field("scheduled_at", &self.scheduled_at)
            .finish_non_exhaustive()
    }
}

/// Occupancy counters shared between the pool and every scheduler handle.
#[derive(Debug)]
pub struct PoolGauge {
    size: usize,
    busy: AtomicUsize,
    queued: AtomicUsize,
}

impl PoolGauge {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            busy: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            busy: self.busy.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
        }
    }
}

pub struct WorkerPool {
    queue_tx: mpsc::UnboundedSender<WorkItem>,
    gauge: Arc<PoolGauge>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `gauge.size` workers named `<name_prefix><n>`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        name_prefix: &str,
        gauge: Arc<PoolGauge>,
        clock: Arc<dyn Clock>,
        reports_tx: mpsc::UnboundedSender<ExecutionReport>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<WorkItem>();
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let workers = (1..=gauge.size)
            .map(|n| {
                let worker = Worker {
                    name: format!("{name_prefix}{n}"),
                    queue: Arc::clone(&queue_rx),
                    gauge: Arc::clone(&gauge),
                    clock: Arc::clone(&clock),
                    reports_tx: reports_tx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(size = gauge.size, "worker pool started");
        Self {
            queue_tx,
            gauge,
            workers,
        }
    }

    /// Enqueue without waiting. Items beyond the pool size wait in the queue.
    pub fn submit(&self, item: WorkItem) -> Result<()> {
        self.gauge.queued.fetch_add(1, Ordering::Relaxed);
        self.queue_tx.send(item).map_err(|rejected| {
            self.gauge.queued.fetch_sub(1, Ordering::Relaxed);
            warn!(task_id = %rejected.0.task_id, "worker pool closed, firing dropped");
            SchedulerError::ShuttingDown
        })
    }

    pub fn stats(&self) -> PoolStats {
        self.gauge.snapshot()
    }

    /// Close the queue and wait for workers to drain it.
    pub async fn shutdown(self) {
        drop(self.queue_tx);
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("worker task ended abnormally: {e}");
            }
        }
        info!("worker pool stopped");
    }
}

struct Worker {
    name: String,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    gauge: Arc<PoolGauge>,
    clock: Arc<dyn Clock>,
    reports_tx: mpsc::UnboundedSender<ExecutionReport>,
}

impl Worker {
    async fn run(self) {
        debug!(worker = %self.name, "worker started");
        loop {
            // Only one idle worker waits on the receiver at a time.
            let next = { self.queue.lock().await.recv().await };
            let Some(item) = next else { break };

            self.gauge.queued.fetch_sub(1, Ordering::Relaxed);
            self.gauge.busy.fetch_add(1, Ordering::Relaxed);
            let report = self.execute(item).await;
            self.gauge.busy.fetch_sub(1, Ordering::Relaxed);

            if self.reports_tx.send(report).is_err() {
                debug!(worker = %self.name, "report channel closed");
            }
        }
        debug!(worker = %self.name, "worker stopped");
    }

    async fn execute(&self, item: WorkItem) -> ExecutionReport {
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let ctx = JobContext {
            task_id: item.task_id.clone(),
            run_id,
            run_number: item.run_number,
            scheduled_at: item.scheduled_at,
            fired_at: started_at,
        };

        // The job gets its own task so a panic unwinds there, not here.
        let job = Arc::clone(&item.job);
        let joined = tokio::spawn(async move { job.run(ctx).await }).await;
        let finished_at = self.clock.now();
        let duration_ms = (finished_at - started_at).num_milliseconds();

        let outcome = match joined {
            Ok(Ok(())) => {
                debug!(
                    task_id = %item.task_id,
                    %run_id,
                    worker = %self.name,
                    duration_ms,
                    "job completed"
                );
                ExecutionOutcome::Succeeded
            }
            Ok(Err(e)) => {
                warn!(
                    task_id = %item.task_id,
                    %run_id,
                    worker = %self.name,
                    duration_ms,
                    error = %e,
                    "job failed"
                );
                ExecutionOutcome::Failed(e.to_string())
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    join_err.to_string()
                };
                error!(
                    task_id = %item.task_id,
                    %run_id,
                    worker = %self.name,
                    duration_ms,
                    panic = %message,
                    "job panicked"
                );
                ExecutionOutcome::Panicked(message)
            }
        };

        ExecutionReport {
            run_id,
            task_id: item.task_id,
            epoch: item.epoch,
            run_number: item.run_number,
            scheduled_at: item.scheduled_at,
            started_at,
            finished_at,
            worker: self.name.clone(),
            outcome,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
