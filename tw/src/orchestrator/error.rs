//! Orchestrator errors

use thiserror::Error;

use super::engine::EngineError;
use crate::checkpoint::CheckpointError;
use crate::error::{ErrorCode, ErrorInfo};
use crate::scheduler::SchedulerError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Concurrency limit reached ({limit} windows open)")]
    ConcurrencyLimit { limit: usize },

    #[error("Task {task_id} rejected: {reason}")]
    Rejected { task_id: String, reason: String },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Execution engine error: {0}")]
    Engine(#[from] EngineError),
}

impl OrchestratorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConcurrencyLimit { .. } => ErrorCode::ConcurrencyLimit,
            Self::Rejected { .. } => ErrorCode::InvalidState,
            Self::Checkpoint(e) => e.code(),
            Self::Scheduler(e) => e.code(),
            Self::Engine(_) => ErrorCode::ExecutionError,
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            OrchestratorError::ConcurrencyLimit { limit: 3 }.code(),
            ErrorCode::ConcurrencyLimit
        );
        assert_eq!(
            OrchestratorError::from(CheckpointError::NotFound("T1".into())).code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            OrchestratorError::from(EngineError::new("boom")).to_info().code,
            ErrorCode::ExecutionError
        );
    }
}
