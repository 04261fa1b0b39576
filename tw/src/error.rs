//! Structured error payload shared by the CLI and UI-facing surfaces

use serde::{Deserialize, Serialize};

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidState,
    StorageError,
    ConcurrencyLimit,
    ConfigError,
    ExecutionError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::StorageError => "STORAGE_ERROR",
            Self::ConcurrencyLimit => "CONCURRENCY_LIMIT",
            Self::ConfigError => "CONFIG_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{message, code}` as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub code: ErrorCode,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ErrorInfo {}

impl From<&eyre::Report> for ErrorInfo {
    fn from(report: &eyre::Report) -> Self {
        // Walk the chain for a typed cause before falling back
        for cause in report.chain() {
            if let Some(e) = cause.downcast_ref::<crate::checkpoint::CheckpointError>() {
                return Self::new(e.code(), report.to_string());
            }
            if let Some(e) = cause.downcast_ref::<crate::orchestrator::OrchestratorError>() {
                return Self::new(e.code(), report.to_string());
            }
            if let Some(e) = cause.downcast_ref::<crate::scheduler::SchedulerError>() {
                return Self::new(e.code(), report.to_string());
            }
            if cause.downcast_ref::<checkpointstore::StoreError>().is_some() {
                return Self::new(ErrorCode::StorageError, report.to_string());
            }
            if let Some(e) = cause.downcast_ref::<ErrorInfo>() {
                return e.clone();
            }
        }
        Self::new(ErrorCode::InternalError, report.to_string())
    }
}
