//! Checkpoint manager messages
//!
//! Commands and responses for the actor pattern.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use checkpointstore::StoreError;

use crate::domain::{Checkpoint, CheckpointPatch, CheckpointStatus, CheckpointStatusView, RecoverySummary, Transition};
use crate::error::{ErrorCode, ErrorInfo};

/// Errors from checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} checkpoint {task_id} in status {from}")]
    InvalidTransition {
        task_id: String,
        from: CheckpointStatus,
        action: Transition,
    },

    #[error("Checkpoint {task_id} is at node {current}; refusing to move back to {requested}")]
    NodeIndexRegression { task_id: String, current: u32, requested: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Channel error")]
    ChannelError,
}

impl CheckpointError {
    /// Stable code for the upward error payload
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidTransition { .. } | Self::NodeIndexRegression { .. } => ErrorCode::InvalidState,
            Self::Store(_) => ErrorCode::StorageError,
            Self::ChannelError => ErrorCode::InternalError,
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.code(), self.to_string())
    }
}

/// Response from checkpoint operations
pub type CheckpointResponse<T> = Result<T, CheckpointError>;

/// Commands sent to the CheckpointManager actor
#[derive(Debug)]
pub enum CheckpointCommand {
    Create {
        checkpoint: Box<Checkpoint>,
        reply: oneshot::Sender<CheckpointResponse<Checkpoint>>,
    },
    Update {
        task_id: String,
        patch: Box<CheckpointPatch>,
        reply: oneshot::Sender<CheckpointResponse<Option<Checkpoint>>>,
    },
    Pause {
        task_id: String,
        reply: oneshot::Sender<CheckpointResponse<Option<Checkpoint>>>,
    },
    Fail {
        task_id: String,
        error: ErrorInfo,
        failure_point: Option<String>,
        reply: oneshot::Sender<CheckpointResponse<Option<Checkpoint>>>,
    },
    Complete {
        task_id: String,
        result: Value,
        reply: oneshot::Sender<CheckpointResponse<Option<Checkpoint>>>,
    },
    Resume {
        task_id: String,
        reply: oneshot::Sender<CheckpointResponse<Checkpoint>>,
    },
    Delete {
        task_id: String,
        reply: oneshot::Sender<CheckpointResponse<bool>>,
    },
    Load {
        task_id: String,
        reply: oneshot::Sender<CheckpointResponse<Option<Checkpoint>>>,
    },
    Status {
        task_id: String,
        reply: oneshot::Sender<CheckpointResponse<CheckpointStatusView>>,
    },
    Summary {
        task_id: String,
        reply: oneshot::Sender<CheckpointResponse<Option<RecoverySummary>>>,
    },
    List {
        reply: oneshot::Sender<Vec<Checkpoint>>,
    },
    Cleanup {
        max_age: Duration,
        reply: oneshot::Sender<CheckpointResponse<usize>>,
    },
    Associate {
        old_task_id: String,
        new_task_id: String,
        reply: oneshot::Sender<CheckpointResponse<Option<Checkpoint>>>,
    },
    Evict {
        task_id: String,
        reply: oneshot::Sender<bool>,
    },

    // Shutdown
    Shutdown,
}
