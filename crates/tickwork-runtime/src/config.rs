//! Operation scheduler settings and the combined workspace configuration file.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tickwork_kernel::{ConfigError, SupervisorConfig};

pub const DEFAULT_POOL_SIZE: usize = 4;

/// Time allowance for one resume call.
pub const DEFAULT_SLICE_BUDGET_MS: u64 = 5;

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_slice_budget_ms() -> u64 {
    DEFAULT_SLICE_BUDGET_MS
}

fn default_notify_long_operations() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct OperationSchedulerConfig {
    /// How many operations may be slicing at once. Must be greater than zero.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_slice_budget_ms")]
    pub slice_budget_ms: u64,
    /// Tell the owner once when an operation needs more than one slice.
    #[serde(default = "default_notify_long_operations")]
    pub notify_long_operations: bool,
}

impl Default for OperationSchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            slice_budget_ms: DEFAULT_SLICE_BUDGET_MS,
            notify_long_operations: true,
        }
    }
}

impl OperationSchedulerConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_slice_budget(mut self, budget: Duration) -> Self {
        self.slice_budget_ms = budget.as_millis() as u64;
        self
    }

    pub fn with_notify_long_operations(mut self, notify: bool) -> Self {
        self.notify_long_operations = notify;
        self
    }

    pub fn slice_budget(&self) -> Duration {
        Duration::from_millis(self.slice_budget_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize(self.pool_size));
        }
        Ok(())
    }
}

/// Top-level configuration file:
///
/// ```toml
/// [supervisor]
/// quota = 8
/// queue_inform_delay_ms = 1000
///
/// [operations]
/// pool_size = 4
/// slice_budget_ms = 5
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TickworkConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub operations: OperationSchedulerConfig,
}

impl TickworkConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.supervisor.validate()?;
        self.operations.validate()
    }
}
