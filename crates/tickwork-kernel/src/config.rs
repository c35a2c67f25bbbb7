//! Supervisor tuning knobs.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Running-set ceiling used when none is configured.
pub const DEFAULT_QUOTA: usize = 8;

/// How long a task may sit in the queue before its owner is told about it.
pub const DEFAULT_QUEUE_INFORM_DELAY_MS: u64 = 1000;

fn default_quota() -> usize {
    DEFAULT_QUOTA
}

fn default_queue_inform_delay_ms() -> u64 {
    DEFAULT_QUEUE_INFORM_DELAY_MS
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Maximum number of tasks running at once. Must be greater than zero.
    #[serde(default = "default_quota")]
    pub quota: usize,
    /// Delay before a still-queued task's owner receives a "queued" notice.
    #[serde(default = "default_queue_inform_delay_ms")]
    pub queue_inform_delay_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            queue_inform_delay_ms: DEFAULT_QUEUE_INFORM_DELAY_MS,
        }
    }
}

impl SupervisorConfig {
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_queue_inform_delay(mut self, delay: Duration) -> Self {
        self.queue_inform_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn queue_inform_delay(&self) -> Duration {
        Duration::from_millis(self.queue_inform_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quota == 0 {
            return Err(ConfigError::InvalidQuota(self.quota));
        }
        Ok(())
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
