//! Scheduler configuration

use serde::{Deserialize, Serialize};

use crate::config::{ConcurrencyConfig, MAX_CONCURRENT_TASKS, MIN_CONCURRENT_TASKS};

use super::error::SchedulerError;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max concurrently running tasks (1-5)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl From<&ConcurrencyConfig> for SchedulerConfig {
    fn from(config: &ConcurrencyConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_tasks,
        }
    }
}

/// Reject caps outside 1..=5
pub fn validate_max_concurrent(value: usize) -> Result<usize, SchedulerError> {
    if (MIN_CONCURRENT_TASKS..=MAX_CONCURRENT_TASKS).contains(&value) {
        Ok(value)
    } else {
        Err(SchedulerError::InvalidConcurrency {
            value,
            min: MIN_CONCURRENT_TASKS,
            max: MAX_CONCURRENT_TASKS,
        })
    }
}
