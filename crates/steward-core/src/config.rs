//! Typed JSON configuration.
//!
//! ```json
//! {
//!   "ceiling": 1,
//!   "reverted_grace": 3600,
//!   "health": { "metric_name": "steward-mainnet", "namespace": "STEWARD/JOBS" },
//!   "watchdog": { "interval": 180 },
//!   "tasks": {
//!     "run_settlement": { "interval": 60, "timeout": 180, "partial_execution_steps": 100 },
//!     "pay_holders": { "interval": 60, "publishes": "pay_holders_confirm_block" },
//!     "splitter_split": { "interval": 60, "after": "pay_holders_confirm_block",
//!                         "watermark": "splitter_confirm_block" }
//!   }
//! }
//! ```
//!
//! Durations are whole seconds. Unknown fields are rejected so a typo never
//! silently falls back to a default.
//!
//! The chain watchdog runs every 180 s unless the config says otherwise; it
//! can only be turned off explicitly with `"watchdog": { "enabled": false }`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::{DEFAULT_CEILING, SchedulerBuilder, TaskSpec, WatermarkGate};
use crate::domain::{DEFAULT_REVERTED_GRACE, DEFAULT_TIMEOUT, Identity, TaskName};
use crate::impls::{NoopHealthSink, TracingHealthSink};
use crate::ports::{HealthSink, TaskAction, TaskParams};

pub const DEFAULT_NAMESPACE: &str = "STEWARD/JOBS";
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(180);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("task {0}: \"after\" requires \"watermark\"")]
    AfterWithoutWatermark(TaskName),

    #[error("task {0}: \"watermark\" requires \"after\"")]
    WatermarkWithoutAfter(TaskName),

    #[error("identity {identity}: conflicting ceilings {first} and {second}")]
    ConflictingCeiling {
        identity: Identity,
        first: u64,
        second: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StewardConfig {
    /// Default outstanding-operation ceiling per identity.
    #[serde(default = "default_ceiling")]
    pub ceiling: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Seconds a reverted operation is held before its task may retry.
    #[serde(default = "default_reverted_grace")]
    pub reverted_grace: u64,

    #[serde(default)]
    pub health: HealthConfig,

    /// Chain watchdog; enabled with the default interval when absent.
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,

    pub tasks: BTreeMap<TaskName, TaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            metric_name: None,
            namespace: default_namespace(),
        }
    }
}

impl HealthConfig {
    /// Heartbeat sink for this config. `metric_name` (e.g. from the
    /// environment) takes precedence; with no metric name at all the sink is
    /// a silent no-op.
    pub fn sink(&self, metric_name: Option<String>) -> Arc<dyn HealthSink> {
        match metric_name.or_else(|| self.metric_name.clone()) {
            Some(name) => Arc::new(TracingHealthSink::new(name, self.namespace.clone())),
            None => Arc::new(NoopHealthSink),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_watchdog_interval")]
    pub interval: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_watchdog_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Seconds between firings.
    pub interval: u64,

    /// Seconds an operation may stay unconfirmed before it is abandoned.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_execution_steps: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,

    #[serde(default)]
    pub identity: Identity,

    /// Ceiling of this task's identity, overriding the global one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<u64>,

    /// Key written with the current height when an operation confirms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishes: Option<String>,

    /// Upstream key this task waits for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,

    /// This task's own watermark key, paired with `after`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<String>,
}

impl TaskConfig {
    pub fn params(&self) -> TaskParams {
        TaskParams {
            partial_execution_steps: self.partial_execution_steps,
            gas_limit: self.gas_limit,
        }
    }

    pub fn watermark_gate(&self) -> Option<WatermarkGate> {
        match (&self.after, &self.watermark) {
            (Some(upstream), Some(own)) => Some(WatermarkGate::new(upstream, own)),
            _ => None,
        }
    }

    pub fn to_spec(&self, name: &TaskName, action: Arc<dyn TaskAction>) -> TaskSpec {
        let mut spec = TaskSpec::new(name.clone(), Duration::from_secs(self.interval), action)
            .timeout(Duration::from_secs(self.timeout))
            .identity(self.identity.clone())
            .params(self.params());
        if let Some(key) = &self.publishes {
            spec = spec.publishes(key.clone());
        }
        if let Some(gate) = self.watermark_gate() {
            spec = spec.after(gate);
        }
        spec
    }
}

fn default_ceiling() -> u64 {
    DEFAULT_CEILING
}

fn default_reverted_grace() -> u64 {
    DEFAULT_REVERTED_GRACE.as_secs()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_watchdog_interval() -> u64 {
    DEFAULT_WATCHDOG_INTERVAL.as_secs()
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn non_zero(value: u64, field: impl FnOnce() -> String) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { field: field() });
    }
    Ok(())
}

impl StewardConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero(self.ceiling, || "ceiling".to_string())?;
        non_zero(self.reverted_grace, || "reverted_grace".to_string())?;
        if let Some(workers) = self.max_workers {
            non_zero(workers as u64, || "max_workers".to_string())?;
        }
        if self.watchdog.enabled {
            non_zero(self.watchdog.interval, || "watchdog.interval".to_string())?;
        }

        let mut ceilings: HashMap<&Identity, u64> = HashMap::new();
        for (name, task) in &self.tasks {
            non_zero(task.interval, || format!("tasks.{name}.interval"))?;
            non_zero(task.timeout, || format!("tasks.{name}.timeout"))?;

            match (&task.after, &task.watermark) {
                (Some(_), None) => return Err(ConfigError::AfterWithoutWatermark(name.clone())),
                (None, Some(_)) => return Err(ConfigError::WatermarkWithoutAfter(name.clone())),
                _ => {}
            }

            if let Some(ceiling) = task.ceiling {
                non_zero(ceiling, || format!("tasks.{name}.ceiling"))?;
                if let Some(first) = ceilings.insert(&task.identity, ceiling) {
                    if first != ceiling {
                        return Err(ConfigError::ConflictingCeiling {
                            identity: task.identity.clone(),
                            first,
                            second: ceiling,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Configure `builder` from this config. `action_for` supplies the
    /// domain action of each task.
    pub fn apply<F>(&self, builder: SchedulerBuilder, mut action_for: F) -> SchedulerBuilder
    where
        F: FnMut(&TaskName, &TaskConfig) -> Arc<dyn TaskAction>,
    {
        let mut builder = builder
            .ceiling(self.ceiling)
            .reverted_grace(Duration::from_secs(self.reverted_grace));

        if let Some(workers) = self.max_workers {
            builder = builder.max_workers(workers);
        }
        if self.watchdog.enabled {
            builder = builder.watchdog(Duration::from_secs(self.watchdog.interval));
        }
        if let Some(path) = &self.persist_path {
            builder = builder.persist_to(path.clone());
        }

        for (name, task) in &self.tasks {
            if let Some(ceiling) = task.ceiling {
                builder = builder.identity_ceiling(task.identity.clone(), ceiling);
            }
            let action = action_for(name, task);
            builder = builder.register(task.to_spec(name, action));
        }
        builder
    }
}
