//! `cadence-core`: configuration and shared types for the Cadence workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    CadenceConfig, GatewayConfig, SchedulerConfig, StartupTask, DEFAULT_RETAIN_CANCELLED,
};
pub use error::{CadenceError, Result};
pub use types::TriggerSpec;
