//! Scheduler errors

use thiserror::Error;

use crate::error::{ErrorCode, ErrorInfo};

/// Configuration errors raised by the scheduler and timers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("max concurrent tasks must be between {min} and {max}, got {value}")]
    InvalidConcurrency { value: usize, min: usize, max: usize },

    #[error("unsupported schedule: {0}")]
    UnsupportedSchedule(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),
}

impl SchedulerError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ConfigError
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.code(), self.to_string())
    }
}
