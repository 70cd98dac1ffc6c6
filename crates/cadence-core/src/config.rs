use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};
use crate::types::TriggerSpec;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "dyn-sched-";
pub const DEFAULT_RETAIN_CANCELLED: usize = 1000;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Scheduler subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker slots. Must be positive.
    /// Override with env var: CADENCE_SCHEDULER__POOL_SIZE=4
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Worker names in log records are `<prefix><n>`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Capacity of the execution-report broadcast channel.
    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,
    /// How many cancelled tasks stay listed before the oldest are forgotten.
    #[serde(default = "default_retain_cancelled")]
    pub retain_cancelled: usize,
    /// Tasks registered when the gateway starts.
    #[serde(default)]
    pub tasks: Vec<StartupTask>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            report_capacity: default_report_capacity(),
            retain_cancelled: DEFAULT_RETAIN_CANCELLED,
            tasks: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Shorthand used by tests and embedders that only care about pool size.
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(CadenceError::Config(
                "scheduler.pool_size must be a positive integer".to_string(),
            ));
        }
        if self.report_capacity == 0 {
            return Err(CadenceError::Config(
                "scheduler.report_capacity must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// A task declared in the config file, registered at startup.
///
/// ```toml
/// [[scheduler.tasks]]
/// id = "every-minute"
/// kind = "cron"
/// expression = "0 * * * * *"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupTask {
    pub id: String,
    #[serde(flatten)]
    pub trigger: TriggerSpec,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}
fn default_thread_name_prefix() -> String {
    DEFAULT_THREAD_NAME_PREFIX.to_string()
}
fn default_report_capacity() -> usize {
    256
}
fn default_retain_cancelled() -> usize {
    DEFAULT_RETAIN_CANCELLED
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore: `CADENCE_GATEWAY__PORT=9000`.
    /// A missing file is not an error; defaults fill every field.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract::<CadenceConfig>()
            .map_err(|e| CadenceError::Config(e.to_string()))
            .and_then(|config| {
                config.scheduler.validate()?;
                Ok(config)
            })
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CADENCE_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
