use thiserror::Error;

/// Errors returned synchronously by the scheduler's public operations.
///
/// Job failures are not represented here: they are reported as an
/// [`ExecutionOutcome`](crate::types::ExecutionOutcome) and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The cron expression is malformed or can never fire.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// Zero or negative period (or negative initial delay).
    #[error("Invalid period: {period_millis}ms (must be > 0)")]
    InvalidPeriod { period_millis: i64 },

    /// A scheduled task with this id is already registered.
    #[error("Task already exists: {id}")]
    AlreadyExists { id: String },

    /// No scheduled task with this id exists.
    #[error("Task not found: {id}")]
    NotFound { id: String },

    /// The engine has stopped and no longer accepts work.
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

impl SchedulerError {
    /// Stable code string for adapters to map onto their transport.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidExpression { .. } => "INVALID_EXPRESSION",
            SchedulerError::InvalidPeriod { .. } => "INVALID_PERIOD",
            SchedulerError::AlreadyExists { .. } => "ALREADY_EXISTS",
            SchedulerError::NotFound { .. } => "NOT_FOUND",
            SchedulerError::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// True for the ValidationError family (bad cron, bad period).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidExpression { .. } | SchedulerError::InvalidPeriod { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
