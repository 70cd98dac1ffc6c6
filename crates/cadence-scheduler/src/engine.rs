use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info};

use cadence_core::{SchedulerConfig, TriggerSpec};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::job::{Job, LogJob};
use crate::pool::{PoolGauge, WorkItem, WorkerPool};
use crate::registry::TaskRegistry;
use crate::types::{ExecutionReport, PoolStats, TaskInfo, TaskStatus};

/// Upper bound on a single driver sleep, so wall-clock jumps are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(3600);

/// Cheap, cloneable entry point for registering, cancelling and listing tasks
/// while the engine loop runs.
#[derive(Clone)]
pub struct SchedulerHandle {
    registry: Arc<TaskRegistry>,
    gauge: Arc<PoolGauge>,
    clock: Arc<dyn Clock>,
    reports: broadcast::Sender<ExecutionReport>,
}

impl SchedulerHandle {
    /// Register a task with a custom job. Returns the first fire time.
    pub fn register(
        &self,
        id: &str,
        trigger: TriggerSpec,
        job: Arc<dyn Job>,
    ) -> Result<DateTime<Utc>> {
        self.registry.register(id, &trigger, job, self.clock.now())
    }

    pub fn register_cron(&self, id: &str, cron_expr: &str) -> Result<()> {
        self.register(id, TriggerSpec::cron(cron_expr), Arc::new(LogJob::new("Cron")))
            .map(|_| ())
    }

    pub fn register_fixed_rate(&self, id: &str, period_millis: i64) -> Result<()> {
        self.register(
            id,
            TriggerSpec::fixed_rate(period_millis),
            Arc::new(LogJob::new("FixedRate")),
        )
        .map(|_| ())
    }

    pub fn register_fixed_delay(&self, id: &str, period_millis: i64) -> Result<()> {
        self.register(
            id,
            TriggerSpec::fixed_delay(period_millis),
            Arc::new(LogJob::new("FixedDelay")),
        )
        .map(|_| ())
    }

    /// Cancel a scheduled task. A running execution finishes; nothing fires after.
    pub fn cancel(&self, id: &str) -> Result<()> {
        self.registry.cancel(id).map(|_| ())
    }

    pub fn list_tasks(&self) -> BTreeMap<String, TaskStatus> {
        self.registry.list()
    }

    pub fn describe(&self, id: &str) -> Option<TaskInfo> {
        self.registry.describe(id)
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.registry.tasks()
    }

    pub fn stats(&self) -> PoolStats {
        self.gauge.snapshot()
    }

    /// Receive a copy of every execution report from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionReport> {
        self.reports.subscribe()
    }
}

/// The single coordinating loop over the registry and the worker pool.
pub struct SchedulerEngine {
    registry: Arc<TaskRegistry>,
    gauge: Arc<PoolGauge>,
    clock: Arc<dyn Clock>,
    thread_name_prefix: String,
    reports_tx: mpsc::UnboundedSender<ExecutionReport>,
    reports_rx: mpsc::UnboundedReceiver<ExecutionReport>,
    broadcast_tx: broadcast::Sender<ExecutionReport>,
}

impl SchedulerEngine {
    pub fn new(config: &SchedulerConfig) -> cadence_core::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> cadence_core::Result<Self> {
        config.validate()?;
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(config.report_capacity);
        Ok(Self {
            registry: Arc::new(TaskRegistry::with_retention(config.retain_cancelled)),
            gauge: Arc::new(PoolGauge::new(config.pool_size)),
            clock,
            thread_name_prefix: config.thread_name_prefix.clone(),
            reports_tx,
            reports_rx,
            broadcast_tx,
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            registry: Arc::clone(&self.registry),
            gauge: Arc::clone(&self.gauge),
            clock: Arc::clone(&self.clock),
            reports: self.broadcast_tx.clone(),
        }
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true` or its sender
    /// is dropped, then lets in-flight and queued executions finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            registry,
            gauge,
            clock,
            thread_name_prefix,
            reports_tx,
            mut reports_rx,
            broadcast_tx,
        } = self;

        let pool = WorkerPool::spawn(&thread_name_prefix, gauge, Arc::clone(&clock), reports_tx);
        info!(pool_size = pool.stats().size, "scheduler engine started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = clock.now();
            for item in registry.take_due(now) {
                dispatch(&pool, item);
            }
            let sleep_for = registry
                .next_deadline()
                .map_or(MAX_SLEEP, |at| until(at, now));

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = registry.notified() => {}
                Some(report) = reports_rx.recv() => {
                    if let Some(item) = registry.complete(&report, clock.now()) {
                        dispatch(&pool, item);
                    }
                    // No subscribers is fine.
                    let _ = broadcast_tx.send(report);
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        info!("scheduler engine shutting down");
        registry.close();
        pool.shutdown().await;

        while let Ok(report) = reports_rx.try_recv() {
            registry.complete(&report, clock.now());
            let _ = broadcast_tx.send(report);
        }
        info!("scheduler engine stopped");
    }
}

fn dispatch(pool: &WorkerPool, item: WorkItem) {
    debug!(
        task_id = %item.task_id,
        fire_at = %item.scheduled_at,
        run = item.run_number,
        "dispatching firing"
    );
    if let Err(e) = pool.submit(item) {
        error!("failed to dispatch firing: {e}");
    }
}

/// Time left until `at`. Deadlines in the past, or unrepresentable ones,
/// are due now.
fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO).min(MAX_SLEEP)
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("tasks", &self.registry.len())
            .field("pool", &self.gauge.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::error::SchedulerError;
    use crate::job::job_fn;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn start_engine() -> (SchedulerHandle, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let wall = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let engine = SchedulerEngine::with_clock(
            &SchedulerConfig::with_pool_size(2),
            Arc::new(MonotonicClock::starting_at(wall)),
        )
        .unwrap();
        let handle = engine.handle();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(engine.run(rx));
        (handle, tx, task)
    }

    #[test]
    fn zero_pool_size_is_a_config_error() {
        let err = SchedulerEngine::new(&SchedulerConfig::with_pool_size(0)).err().unwrap();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn sleep_is_never_negative() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        assert_eq!(until(now - chrono::Duration::seconds(5), now), Duration::ZERO);
        assert_eq!(
            until(now + chrono::Duration::milliseconds(250), now),
            Duration::from_millis(250)
        );
        assert_eq!(until(now + chrono::Duration::days(2), now), MAX_SLEEP);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_surface_maps_errors() {
        let (handle, shutdown, task) = start_engine();

        assert!(handle.register_cron("minute", "0 * * * * *").is_ok());
        assert_eq!(
            handle.register_fixed_rate("minute", 1000),
            Err(SchedulerError::AlreadyExists { id: "minute".into() })
        );
        assert_eq!(handle.register_fixed_delay("bad", -5).unwrap_err().code(), "INVALID_PERIOD");
        assert_eq!(handle.cancel("nope").unwrap_err().code(), "NOT_FOUND");
        assert!(handle.cancel("minute").is_ok());
        assert_eq!(handle.list_tasks()["minute"], TaskStatus::Cancelled);

        shutdown.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(handle.register_cron("late", "@hourly"), Err(SchedulerError::ShuttingDown));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_jobs_and_broadcasts_reports() {
        let (handle, shutdown, task) = start_engine();
        let mut reports = handle.subscribe();
        let runs = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&runs);

        handle
            .register(
                "tick",
                TriggerSpec::fixed_rate(100),
                job_fn(move |_| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();

        for expected in 1..=3 {
            let report = reports.recv().await.unwrap();
            assert_eq!(report.task_id, "tick");
            assert_eq!(report.run_number, expected);
            assert!(report.worker.starts_with("dyn-sched-"));
        }
        assert!(runs.load(Ordering::SeqCst) >= 3);
        assert_eq!(handle.describe("tick").unwrap().status, TaskStatus::Scheduled);

        shutdown.send(true).unwrap();
        task.await.unwrap();
    }
}
