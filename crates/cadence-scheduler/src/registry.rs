//! Task registry and the time-ordered wait structure.
//!
//! Both live behind one mutex so that register-then-arm and cancel-then-disarm
//! are single critical sections. No job code ever runs under the lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use cadence_core::{TriggerSpec, DEFAULT_RETAIN_CANCELLED};

use crate::error::{Result, SchedulerError};
use crate::job::Job;
use crate::pool::WorkItem;
use crate::trigger::Trigger;
use crate::types::{ExecutionReport, TaskInfo, TaskStatus};

/// Orders pending firings by instant; `seq` breaks ties in arming order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FiringKey {
    fire_at: DateTime<Utc>,
    seq: u64,
}

struct TaskEntry {
    trigger: Trigger,
    job: Arc<dyn Job>,
    status: TaskStatus,
    epoch: u64,
    registered_at: DateTime<Utc>,
    /// Key of the live pending firing in the timeline.
    pending: Option<FiringKey>,
    in_flight: bool,
    /// Epoch of a run still executing for a cancelled registration this
    /// entry replaced. Keeps `in_flight` set until that run reports.
    draining_epoch: Option<u64>,
    /// Scheduled time of a tick that fell due while `in_flight`.
    overrun: Option<DateTime<Utc>>,
    last_scheduled: Option<DateTime<Utc>>,
    last_finished: Option<DateTime<Utc>>,
    run_count: u64,
    failure_count: u64,
}

impl TaskEntry {
    fn info(&self, id: &str) -> TaskInfo {
        TaskInfo {
            id: id.to_string(),
            trigger: self.trigger.describe(),
            status: self.status,
            registered_at: self.registered_at,
            next_fire_at: self.pending.map(|key| key.fire_at),
            last_scheduled_at: self.last_scheduled,
            last_finished_at: self.last_finished,
            in_flight: self.in_flight,
            run_count: self.run_count,
            failure_count: self.failure_count,
        }
    }

    /// Mark the task running and build the work item for one execution.
    fn dispatch(&mut self, id: &str, scheduled_at: DateTime<Utc>) -> WorkItem {
        self.in_flight = true;
        self.run_count += 1;
        self.last_scheduled = Some(scheduled_at);
        WorkItem {
            task_id: id.to_string(),
            epoch: self.epoch,
            run_number: self.run_count,
            scheduled_at,
            job: Arc::clone(&self.job),
        }
    }
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, TaskEntry>,
    timeline: BTreeMap<FiringKey, String>,
    /// Cancelled entries in cancellation order, oldest first.
    cancelled: VecDeque<(String, u64)>,
    next_seq: u64,
    next_epoch: u64,
    closed: bool,
}

fn arm(
    timeline: &mut BTreeMap<FiringKey, String>,
    next_seq: &mut u64,
    id: &str,
    fire_at: DateTime<Utc>,
) -> FiringKey {
    *next_seq += 1;
    let key = FiringKey {
        fire_at,
        seq: *next_seq,
    };
    timeline.insert(key, id.to_string());
    key
}

/// Forget the oldest cancelled entries beyond `retain`. Entries with a run
/// still in flight are kept until that run reports.
fn prune_cancelled(
    tasks: &mut HashMap<String, TaskEntry>,
    cancelled: &mut VecDeque<(String, u64)>,
    retain: usize,
) {
    let mut budget = cancelled.len();
    while cancelled.len() > retain && budget > 0 {
        budget -= 1;
        let Some((id, epoch)) = cancelled.pop_front() else {
            break;
        };
        match tasks.get(&id) {
            Some(task) if task.epoch == epoch && task.status == TaskStatus::Cancelled => {
                if task.in_flight {
                    cancelled.push_back((id, epoch));
                } else {
                    tasks.remove(&id);
                    debug!(task_id = %id, "evicted cancelled task");
                }
            }
            _ => {}
        }
    }
}

pub struct TaskRegistry {
    inner: Mutex<Inner>,
    changed: Notify,
    retain_cancelled: usize,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAIN_CANCELLED)
    }

    /// Keep at most `retain_cancelled` cancelled entries visible in listings.
    pub fn with_retention(retain_cancelled: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            changed: Notify::new(),
            retain_cancelled,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // No job code runs under this lock; poisoning is recovered.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a task and arm its first firing. Returns the first fire time.
    ///
    /// Fails with `AlreadyExists` when a scheduled task holds `id`; a
    /// cancelled entry is replaced under a fresh epoch. If the cancelled
    /// entry still has a run in flight, the new task does not execute until
    /// that run has finished. Validation failures leave the registry
    /// untouched.
    pub fn register(
        &self,
        id: &str,
        spec: &TriggerSpec,
        job: Arc<dyn Job>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let mut guard = self.lock();
        if guard.closed {
            warn!(task_id = %id, "register rejected: scheduler is shutting down");
            return Err(SchedulerError::ShuttingDown);
        }
        if matches!(guard.tasks.get(id), Some(t) if t.status == TaskStatus::Scheduled) {
            warn!(task_id = %id, "register rejected: task already exists");
            return Err(SchedulerError::AlreadyExists { id: id.to_string() });
        }

        let trigger = Trigger::from_spec(spec).inspect_err(|e| {
            warn!(task_id = %id, error = %e, "register rejected: invalid trigger");
        })?;
        let first = trigger.first_fire_time(now).ok_or_else(|| {
            warn!(task_id = %id, trigger = %spec, "register rejected: no fire time");
            no_fire_time(spec)
        })?;

        let Inner {
            tasks,
            timeline,
            cancelled,
            next_seq,
            next_epoch,
            ..
        } = &mut *guard;
        let draining_epoch = tasks
            .get(id)
            .filter(|old| old.in_flight)
            .map(|old| old.draining_epoch.unwrap_or(old.epoch));
        if tasks.contains_key(id) {
            cancelled.retain(|(cancelled_id, _)| cancelled_id != id);
        }
        *next_epoch += 1;
        let key = arm(timeline, next_seq, id, first);
        let replaced = tasks.insert(
            id.to_string(),
            TaskEntry {
                trigger,
                job,
                status: TaskStatus::Scheduled,
                epoch: *next_epoch,
                registered_at: now,
                pending: Some(key),
                in_flight: draining_epoch.is_some(),
                draining_epoch,
                overrun: None,
                last_scheduled: None,
                last_finished: None,
                run_count: 0,
                failure_count: 0,
            },
        );
        drop(guard);

        info!(
            task_id = %id,
            trigger = %spec,
            fire_at = %first,
            reused_id = replaced.is_some(),
            waits_for_previous_run = draining_epoch.is_some(),
            "task registered"
        );
        self.changed.notify_one();
        Ok(first)
    }

    /// Flip a scheduled task to cancelled and drop its pending firing.
    ///
    /// Returns whether a not-yet-fired firing was removed. A running
    /// execution is left alone; it will not be re-armed.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let mut guard = self.lock();
        let Inner {
            tasks,
            timeline,
            cancelled,
            ..
        } = &mut *guard;

        let Some(task) = tasks
            .get_mut(id)
            .filter(|t| t.status == TaskStatus::Scheduled)
        else {
            warn!(task_id = %id, "cancel rejected: no scheduled task with this id");
            return Err(SchedulerError::NotFound { id: id.to_string() });
        };

        task.status = TaskStatus::Cancelled;
        task.overrun = None;
        let removed = task
            .pending
            .take()
            .is_some_and(|key| timeline.remove(&key).is_some());
        let in_flight = task.in_flight;
        cancelled.push_back((id.to_string(), task.epoch));
        prune_cancelled(tasks, cancelled, self.retain_cancelled);
        drop(guard);

        info!(task_id = %id, removed_pending = removed, in_flight, "task cancelled");
        self.changed.notify_one();
        Ok(removed)
    }

    /// Point-in-time id → status snapshot.
    pub fn list(&self) -> BTreeMap<String, TaskStatus> {
        self.lock()
            .tasks
            .iter()
            .map(|(id, task)| (id.clone(), task.status))
            .collect()
    }

    pub fn describe(&self, id: &str) -> Option<TaskInfo> {
        self.lock().tasks.get(id).map(|task| task.info(id))
    }

    /// All tasks, ordered by id.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let guard = self.lock();
        let mut all: Vec<TaskInfo> = guard
            .tasks
            .iter()
            .map(|(id, task)| task.info(id))
            .collect();
        drop(guard);
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Earliest pending fire time, if anything is armed.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.lock().timeline.first_key_value().map(|(key, _)| key.fire_at)
    }

    /// Pop every firing due at or before `now`.
    ///
    /// Cron and fixed-rate tasks are re-armed before the lock is released.
    /// A task that is still running is not dispatched again: the tick is
    /// recorded as an overrun and replayed once by [`complete`](Self::complete).
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<WorkItem> {
        let mut guard = self.lock();
        let Inner {
            tasks,
            timeline,
            next_seq,
            ..
        } = &mut *guard;

        let mut due = Vec::new();
        while let Some(entry) = timeline.first_entry() {
            if entry.key().fire_at > now {
                break;
            }
            let (key, id) = entry.remove_entry();
            let Some(task) = tasks.get_mut(&id) else {
                continue;
            };
            if task.pending != Some(key) || task.status != TaskStatus::Scheduled {
                continue;
            }
            task.pending = None;

            if task.in_flight {
                if task.overrun.is_none() {
                    task.overrun = Some(key.fire_at);
                    debug!(
                        task_id = %id,
                        fire_at = %key.fire_at,
                        "tick overran a running execution"
                    );
                } else {
                    debug!(
                        task_id = %id,
                        fire_at = %key.fire_at,
                        "tick coalesced into pending overrun"
                    );
                }
            } else {
                due.push(task.dispatch(&id, key.fire_at));
            }

            if task.trigger.is_fixed_delay() {
                continue;
            }
            // The tick just handled covers any grid point at or before now.
            let next = task
                .trigger
                .next_fire_time(key.fire_at, None, now)
                .and_then(|next| {
                    if next <= now {
                        task.trigger.next_fire_time(next, None, now)
                    } else {
                        Some(next)
                    }
                });
            match next {
                Some(fire_at) => task.pending = Some(arm(timeline, next_seq, &id, fire_at)),
                None => warn!(task_id = %id, "trigger has no further fire time, task stays idle"),
            }
        }
        due
    }

    /// Record a finished execution.
    ///
    /// Re-arms fixed-delay tasks from the completion instant and returns the
    /// overrun replay, if one is owed. Reports from an older epoch are ignored.
    pub fn complete(&self, report: &ExecutionReport, now: DateTime<Utc>) -> Option<WorkItem> {
        let mut guard = self.lock();
        let Inner {
            tasks,
            timeline,
            cancelled,
            next_seq,
            closed,
            ..
        } = &mut *guard;

        let task = tasks.get_mut(&report.task_id)?;
        if task.draining_epoch == Some(report.epoch) {
            // A run of the replaced registration finished; the new one may
            // now start, beginning with a tick that fell due meanwhile.
            task.draining_epoch = None;
            task.in_flight = false;
            debug!(
                task_id = %report.task_id,
                epoch = report.epoch,
                "previous registration's run finished"
            );
            if task.status == TaskStatus::Cancelled {
                prune_cancelled(tasks, cancelled, self.retain_cancelled);
                return None;
            }
            if *closed {
                return None;
            }
            let scheduled_at = task.overrun.take()?;
            return Some(task.dispatch(&report.task_id, scheduled_at));
        }
        if task.epoch != report.epoch {
            debug!(
                task_id = %report.task_id,
                epoch = report.epoch,
                current_epoch = task.epoch,
                "ignoring report from a previous registration"
            );
            return None;
        }

        task.in_flight = false;
        task.last_finished = Some(report.finished_at);
        if !report.outcome.is_success() {
            task.failure_count += 1;
        }
        if task.status == TaskStatus::Cancelled {
            prune_cancelled(tasks, cancelled, self.retain_cancelled);
            return None;
        }
        if *closed {
            return None;
        }

        if let Some(scheduled_at) = task.overrun.take() {
            return Some(task.dispatch(&report.task_id, scheduled_at));
        }

        if task.trigger.is_fixed_delay() {
            match task
                .trigger
                .next_fire_time(report.scheduled_at, Some(report.finished_at), now)
            {
                Some(fire_at) => {
                    task.pending = Some(arm(timeline, next_seq, &report.task_id, fire_at));
                }
                None => {
                    warn!(
                        task_id = %report.task_id,
                        "trigger has no further fire time, task stays idle"
                    )
                }
            }
        }
        None
    }

    /// Resolves after the next change to the wait structure.
    pub fn notified(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Refuse further registrations and drop all pending firings.
    pub fn close(&self) {
        let mut guard = self.lock();
        guard.closed = true;
        guard.timeline.clear();
        for task in guard.tasks.values_mut() {
            task.pending = None;
            task.overrun = None;
        }
    }
}

fn no_fire_time(spec: &TriggerSpec) -> SchedulerError {
    match spec {
        TriggerSpec::Cron { expression } => SchedulerError::InvalidExpression {
            expression: expression.clone(),
            reason: "no future fire time".to_string(),
        },
        TriggerSpec::FixedRate { period_millis, .. }
        | TriggerSpec::FixedDelay { period_millis, .. } => SchedulerError::InvalidPeriod {
            period_millis: *period_millis,
        },
    }
}
