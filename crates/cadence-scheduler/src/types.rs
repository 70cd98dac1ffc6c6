use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Externally visible lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Armed, or currently firing and about to be re-armed.
    Scheduled,
    /// Terminal. No further firings will be armed.
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// How a single execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "message", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    /// The job returned an error.
    Failed(String),
    /// The job panicked; caught at the worker boundary.
    Panicked(String),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }
}

/// Produced by the worker pool for every execution it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub task_id: String,
    /// Registration generation the execution belongs to.
    pub epoch: u64,
    /// 1-based execution counter for this registration.
    pub run_number: u64,
    /// Instant the firing was scheduled for.
    pub scheduled_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub worker: String,
    pub outcome: ExecutionOutcome,
}

impl ExecutionReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Read-only snapshot of one task, for listings and the detail route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub trigger: String,
    pub status: TaskStatus,
    pub registered_at: DateTime<Utc>,
    /// Fire time of the live pending firing, if armed.
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_scheduled_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub in_flight: bool,
    pub run_count: u64,
    pub failure_count: u64,
}

/// Worker pool occupancy at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub size: usize,
    pub busy: usize,
    pub queued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(TaskStatus::Scheduled.to_string(), "SCHEDULED");
        assert_eq!(
            serde_json::to_string(&TaskStatus::Cancelled).unwrap(),
            r#""CANCELLED""#
        );
    }

    #[test]
    fn outcome_serialization() {
        let json = serde_json::to_string(&ExecutionOutcome::Failed("boom".into())).unwrap();
        assert_eq!(json, r#"{"result":"failed","message":"boom"}"#);
        assert!(ExecutionOutcome::Succeeded.is_success());
    }
}
