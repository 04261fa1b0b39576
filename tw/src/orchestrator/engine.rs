//! External execution engine seam
//!
//! The engine runs a task's agent steps; this crate only drives it, records
//! progress through the [`ProgressReporter`] and reacts to the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::checkpoint::{CheckpointError, CheckpointManager};
use crate::domain::{CheckpointPatch, ToolResultEntry};

/// Error raised by the engine for one run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    /// Step the run was on when it failed
    pub failure_point: Option<String>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure_point: None,
        }
    }

    pub fn at(mut self, failure_point: impl Into<String>) -> Self {
        self.failure_point = Some(failure_point.into());
        self
    }
}

/// Everything the engine needs to start (or continue) a run
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_id: String,
    pub execution_id: String,
    pub window_id: String,
    pub task_name: String,
    pub workflow_xml: String,
    pub steps: usize,
    pub agents: Vec<String>,
    /// Cursor to continue from; 0 for a fresh run
    pub start_node_index: u32,
    pub completed_nodes: Vec<String>,
    pub resumed: bool,
}

/// What a finished run reports
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// Canonical task id, when the engine assigned its own
    pub task_id: Option<String>,
    /// Set when the run ended in failure without raising
    pub error: Option<EngineError>,
    pub result: Value,
}

impl ExecutionOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn failure(error: EngineError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// LLM-driven agent runtime
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Run the task until it finishes, fails or `cancel` fires
    async fn execute(
        &self,
        request: ExecutionRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, EngineError>;

    /// Best-effort stop of a running task or sub-task
    async fn abort(&self, task_id: &str, reason: &str) -> Result<(), EngineError>;

    /// Ids the engine currently considers live
    async fn task_ids(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
struct ReporterState {
    cursor: u32,
    steps_since_write: u32,
    pending_nodes: Vec<String>,
    pending_results: Vec<ToolResultEntry>,
}

/// Writes step progress into the task's checkpoint
///
/// Progress is written every `interval` steps; [`ProgressReporter::flush`]
/// writes whatever is pending. Once the run is cancelled, step reports are
/// ignored so an aborted run cannot move a paused checkpoint.
#[derive(Clone)]
pub struct ProgressReporter {
    checkpoints: CheckpointManager,
    task_id: String,
    interval: u32,
    cancel: CancellationToken,
    state: Arc<Mutex<ReporterState>>,
}

impl ProgressReporter {
    pub fn new(
        checkpoints: CheckpointManager,
        task_id: impl Into<String>,
        start_node_index: u32,
        interval: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            checkpoints,
            task_id: task_id.into(),
            interval: interval.max(1),
            cancel,
            state: Arc::new(Mutex::new(ReporterState {
                cursor: start_node_index,
                ..Default::default()
            })),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Record one finished step
    pub async fn step_completed(
        &self,
        node_id: &str,
        tool_result: Option<ToolResultEntry>,
    ) -> Result<(), CheckpointError> {
        debug!(task_id = %self.task_id, %node_id, "ProgressReporter::step_completed: called");
        if self.cancel.is_cancelled() {
            debug!(task_id = %self.task_id, "ProgressReporter::step_completed: run cancelled, ignoring");
            return Ok(());
        }

        let mut state = self.state.lock().await;
        state.cursor += 1;
        state.steps_since_write += 1;
        state.pending_nodes.push(node_id.to_string());
        state.pending_results.extend(tool_result);

        if state.steps_since_write >= self.interval {
            self.write(&mut state).await?;
        }
        Ok(())
    }

    /// Write any pending progress now
    pub async fn flush(&self) -> Result<(), CheckpointError> {
        debug!(task_id = %self.task_id, "ProgressReporter::flush: called");
        let mut state = self.state.lock().await;
        if state.steps_since_write == 0 {
            return Ok(());
        }
        self.write(&mut state).await
    }

    /// Current step cursor
    pub async fn cursor(&self) -> u32 {
        self.state.lock().await.cursor
    }

    async fn write(&self, state: &mut ReporterState) -> Result<(), CheckpointError> {
        let mut patch = CheckpointPatch::new().node_index(state.cursor).iteration(state.cursor);
        patch.append_completed_nodes = std::mem::take(&mut state.pending_nodes);
        patch.append_tool_results = std::mem::take(&mut state.pending_results);
        state.steps_since_write = 0;

        self.checkpoints.update_checkpoint(&self.task_id, patch).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointConfig;
    use crate::domain::NewCheckpoint;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_reporter_writes_every_interval() {
        let temp = tempdir().unwrap();
        let checkpoints = CheckpointManager::spawn(temp.path(), &CheckpointConfig::default()).unwrap();
        checkpoints
            .create_checkpoint(NewCheckpoint::new("T1", "").meta(0, 5))
            .await
            .unwrap();

        let reporter = ProgressReporter::new(checkpoints.clone(), "T1", 0, 2, CancellationToken::new());
        reporter.step_completed("open", None).await.unwrap();
        let cp = checkpoints.load_checkpoint("T1").await.unwrap().unwrap();
        assert_eq!(cp.current_node_index, 0);

        reporter
            .step_completed("search", Some(ToolResultEntry::new("search", Value::Null, Value::Bool(true))))
            .await
            .unwrap();
        let cp = checkpoints.load_checkpoint("T1").await.unwrap().unwrap();
        assert_eq!(cp.current_node_index, 2);
        assert_eq!(cp.completed_nodes, vec!["open", "search"]);
        assert_eq!(cp.tool_results.len(), 1);

        reporter.step_completed("click", None).await.unwrap();
        reporter.flush().await.unwrap();
        let cp = checkpoints.load_checkpoint("T1").await.unwrap().unwrap();
        assert_eq!(cp.current_node_index, 3);
        assert_eq!(cp.iteration, 3);
    }

    #[tokio::test]
    async fn test_reporter_ignores_steps_after_cancel() {
        let temp = tempdir().unwrap();
        let checkpoints = CheckpointManager::spawn(temp.path(), &CheckpointConfig::default()).unwrap();
        checkpoints.create_checkpoint(NewCheckpoint::new("T1", "")).await.unwrap();

        let cancel = CancellationToken::new();
        let reporter = ProgressReporter::new(checkpoints.clone(), "T1", 0, 1, cancel.clone());
        cancel.cancel();
        reporter.step_completed("late", None).await.unwrap();

        let cp = checkpoints.load_checkpoint("T1").await.unwrap().unwrap();
        assert!(cp.completed_nodes.is_empty());
        assert_eq!(reporter.cursor().await, 0);
    }

    #[test]
    fn test_outcome_builders() {
        let ok = ExecutionOutcome::success(Value::Bool(true)).with_task_id("canon");
        assert_eq!(ok.task_id.as_deref(), Some("canon"));
        assert!(ok.error.is_none());

        let failed = ExecutionOutcome::failure(EngineError::new("boom").at("step-3"));
        assert_eq!(failed.error.unwrap().failure_point.as_deref(), Some("step-3"));
    }
}
