//! Store error types

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// How much damage a store failure does to the running process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// A single operation failed; retrying may succeed
    Medium,
    /// The store cannot be used for the rest of this process lifetime
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to initialize store directory {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Record file {path} belongs to {stored_key}, not {key}")]
    KeyConflict {
        key: String,
        stored_key: String,
        path: PathBuf,
    },

    #[error("Failed to serialize record {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Log category for every store failure
    pub fn category(&self) -> &'static str {
        "storage"
    }

    /// Severity scaled by impact
    pub fn severity(&self) -> Severity {
        match self {
            StoreError::Init { .. } => Severity::High,
            StoreError::Io { .. }
            | StoreError::Corrupt { .. }
            | StoreError::KeyConflict { .. }
            | StoreError::Serialize { .. } => Severity::Medium,
        }
    }

    /// Whether the caller may retry the operation
    pub fn is_recoverable(&self) -> bool {
        self.severity() < Severity::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")
    }

    #[test]
    fn test_init_error_is_high_severity() {
        let err = StoreError::Init {
            path: PathBuf::from("/nope"),
            source: io_error(),
        };
        assert_eq!(err.severity(), Severity::High);
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), "storage");
    }

    #[test]
    fn test_io_error_is_recoverable() {
        let err = StoreError::Io {
            path: PathBuf::from("/tmp/x.json"),
            source: io_error(),
        };
        assert_eq!(err.severity(), Severity::Medium);
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("/tmp/x.json"));
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Medium.to_string(), "medium");
        assert_eq!(Severity::High.to_string(), "high");
    }
}
