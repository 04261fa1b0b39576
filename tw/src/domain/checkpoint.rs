//! Checkpoint domain type
//!
//! Durable snapshot of one task's workflow progress. Exactly one checkpoint
//! exists per task id; the serialized form (camelCase JSON) is the on-disk
//! format read by recovery tooling.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use checkpointstore::{Record, now_ms};

/// Tool name recorded for the synthetic entry appended on completion
pub const COMPLETION_TOOL_NAME: &str = "task_complete";

/// Checkpoint lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Task is running (or was, if the process died)
    #[default]
    InProgress,
    /// Intentionally stopped; state preserved for resume
    Paused,
    /// Execution failed; may be resumed
    Failed,
    /// Terminal
    Completed,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Paused => write!(f, "paused"),
            Self::Failed => write!(f, "failed"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "in_progress" | "running" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            "completed" | "complete" => Ok(Self::Completed),
            _ => Err(format!(
                "Unknown status: {}. Use: in_progress, paused, failed, or completed",
                s
            )),
        }
    }
}

/// A requested change of checkpoint status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Update,
    Pause,
    Fail,
    Complete,
    Resume,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Update => write!(f, "update"),
            Self::Pause => write!(f, "pause"),
            Self::Fail => write!(f, "fail"),
            Self::Complete => write!(f, "complete"),
            Self::Resume => write!(f, "resume"),
        }
    }
}

impl CheckpointStatus {
    /// Status reached by applying `transition`, or `None` when illegal
    pub fn apply(self, transition: Transition) -> Option<CheckpointStatus> {
        use CheckpointStatus::*;
        match (self, transition) {
            (Completed, _) => None,
            (status, Transition::Update) => Some(status),
            (InProgress | Paused, Transition::Pause) => Some(Paused),
            (InProgress | Failed, Transition::Fail) => Some(Failed),
            (InProgress, Transition::Complete) => Some(Completed),
            (Paused | Failed, Transition::Resume) => Some(InProgress),
            _ => None,
        }
    }

    /// Paused and failed checkpoints can be resumed
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Paused | Self::Failed)
    }

    /// Completed checkpoints accept no further transitions
    pub fn is_terminal(self) -> bool {
        self == Self::Completed
    }
}

/// One entry of the tool-result log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultEntry {
    pub tool_name: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub result: Value,
    pub timestamp: i64,
}

impl ToolResultEntry {
    /// Create an entry stamped with the current time
    pub fn new(tool_name: impl Into<String>, params: Value, result: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
            result,
            timestamp: now_ms(),
        }
    }
}

/// Error recorded when a checkpoint fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub message: String,
    pub code: String,
    pub timestamp: i64,
}

/// Progress counters supplied at creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointMeta {
    pub iteration: u32,
    pub total_iterations: u32,
}

/// Durable snapshot of a task's workflow progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Unique identifier, immutable
    pub id: String,

    /// Task key; one record per task id
    pub task_id: String,

    /// Last write (Unix milliseconds)
    pub timestamp: i64,

    pub status: CheckpointStatus,

    /// Serialized workflow description, opaque here
    pub workflow_xml: String,

    /// Cursor into the workflow's step sequence
    pub current_node_index: u32,

    /// Step identifiers already executed
    #[serde(default)]
    pub completed_nodes: Vec<String>,

    /// Exported agent context of the task's window
    #[serde(default)]
    pub agent_context: Value,

    #[serde(default)]
    pub global_context: Map<String, Value>,

    #[serde(default)]
    pub iteration: u32,

    #[serde(default)]
    pub total_iterations: u32,

    #[serde(default)]
    pub tool_results: Vec<ToolResultEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_point: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_timestamp: Option<i64>,

    /// Creation time (Unix milliseconds)
    #[serde(default)]
    pub created_at: i64,
}

impl Checkpoint {
    /// Create an in-progress checkpoint with a generated ID
    pub fn new(task_id: impl Into<String>, workflow_xml: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            task_id: task_id.into(),
            timestamp: now,
            status: CheckpointStatus::InProgress,
            workflow_xml: workflow_xml.into(),
            current_node_index: 0,
            completed_nodes: Vec::new(),
            agent_context: Value::Null,
            global_context: Map::new(),
            iteration: 0,
            total_iterations: 0,
            tool_results: Vec::new(),
            failure_point: None,
            error: None,
            retry_count: 0,
            last_retry_timestamp: None,
            created_at: now,
        }
    }

    /// Refresh the last-write timestamp
    pub fn touch(&mut self) {
        self.timestamp = now_ms();
    }

    /// Move to the status reached by `transition`
    ///
    /// Returns the previous status as the error when the edge is illegal.
    pub fn transition(&mut self, transition: Transition) -> Result<(), CheckpointStatus> {
        let next = self.status.apply(transition).ok_or(self.status)?;
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Merge a partial update
    ///
    /// Returns `Err(current)` when the patch would move the node cursor of an
    /// in-progress checkpoint backwards; nothing is changed in that case.
    pub fn apply_patch(&mut self, patch: CheckpointPatch) -> Result<(), u32> {
        if let Some(index) = patch.current_node_index
            && self.status == CheckpointStatus::InProgress
            && index < self.current_node_index
        {
            return Err(self.current_node_index);
        }

        if let Some(workflow) = patch.workflow_xml {
            self.workflow_xml = workflow;
        }
        if let Some(index) = patch.current_node_index {
            self.current_node_index = index;
        }
        self.completed_nodes.extend(patch.append_completed_nodes);
        if let Some(ctx) = patch.agent_context {
            self.agent_context = ctx;
        }
        if let Some(ctx) = patch.global_context {
            self.global_context = ctx;
        }
        if let Some(iteration) = patch.iteration {
            self.iteration = iteration;
        }
        if let Some(total) = patch.total_iterations {
            self.total_iterations = total;
        }
        self.tool_results.extend(patch.append_tool_results);
        self.touch();
        Ok(())
    }

    /// Bump the retry counter
    pub fn record_retry(&mut self) {
        self.retry_count += 1;
        self.last_retry_timestamp = Some(now_ms());
    }

    /// Percent of the workflow done, truncated; 0 when the total is unknown
    pub fn progress_percent(&self) -> u32 {
        if self.total_iterations == 0 {
            return 0;
        }
        let pct = u64::from(self.current_node_index) * 100 / u64::from(self.total_iterations);
        pct.min(100) as u32
    }

    /// Lightweight status projection
    pub fn status_view(&self) -> CheckpointStatusView {
        CheckpointStatusView {
            exists: true,
            status: Some(self.status),
            iteration: Some(self.iteration),
            failure_point: self.failure_point.clone(),
            timestamp: Some(self.timestamp),
        }
    }

    /// Human-facing recovery projection
    pub fn recovery_summary(&self, tokens_per_node: u64) -> RecoverySummary {
        RecoverySummary {
            task_id: self.task_id.clone(),
            can_recover: self.status.is_recoverable(),
            status: self.status,
            progress: self.progress_percent(),
            completed_nodes: self.completed_nodes.len(),
            total_iterations: self.total_iterations,
            estimated_tokens_saved: self.completed_nodes.len() as u64 * tokens_per_node,
            failure_reason: self.error.as_ref().map(|e| e.message.clone()),
            retry_count: self.retry_count,
            last_checkpoint: self.timestamp,
        }
    }
}

impl Record for Checkpoint {
    fn key(&self) -> &str {
        &self.task_id
    }

    fn updated_at(&self) -> i64 {
        self.timestamp
    }

    fn is_sweepable(&self) -> bool {
        self.status == CheckpointStatus::Completed
    }
}

/// Initial contents for a freshly created checkpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewCheckpoint {
    pub task_id: String,
    pub workflow_xml: String,
    pub current_node_index: u32,
    pub completed_nodes: Vec<String>,
    pub agent_context: Value,
    pub global_context: Map<String, Value>,
    pub meta: CheckpointMeta,
}

impl NewCheckpoint {
    pub fn new(task_id: impl Into<String>, workflow_xml: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            workflow_xml: workflow_xml.into(),
            ..Default::default()
        }
    }

    pub fn node_index(mut self, index: u32) -> Self {
        self.current_node_index = index;
        self
    }

    pub fn completed_nodes(mut self, nodes: Vec<String>) -> Self {
        self.completed_nodes = nodes;
        self
    }

    pub fn agent_context(mut self, ctx: Value) -> Self {
        self.agent_context = ctx;
        self
    }

    pub fn global_context(mut self, ctx: Map<String, Value>) -> Self {
        self.global_context = ctx;
        self
    }

    pub fn meta(mut self, iteration: u32, total_iterations: u32) -> Self {
        self.meta = CheckpointMeta {
            iteration,
            total_iterations,
        };
        self
    }

    /// Build the in-progress record
    pub fn build(self) -> Checkpoint {
        let mut cp = Checkpoint::new(self.task_id, self.workflow_xml);
        cp.current_node_index = self.current_node_index;
        cp.completed_nodes = self.completed_nodes;
        cp.agent_context = self.agent_context;
        cp.global_context = self.global_context;
        cp.iteration = self.meta.iteration;
        cp.total_iterations = self.meta.total_iterations;
        cp
    }
}

/// Partial update for [`Checkpoint::apply_patch`]
///
/// `None` fields are left alone; the `append_*` lists are appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointPatch {
    pub workflow_xml: Option<String>,
    pub current_node_index: Option<u32>,
    pub append_completed_nodes: Vec<String>,
    pub agent_context: Option<Value>,
    pub global_context: Option<Map<String, Value>>,
    pub iteration: Option<u32>,
    pub total_iterations: Option<u32>,
    pub append_tool_results: Vec<ToolResultEntry>,
}

impl CheckpointPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_index(mut self, index: u32) -> Self {
        self.current_node_index = Some(index);
        self
    }

    pub fn completed_node(mut self, node: impl Into<String>) -> Self {
        self.append_completed_nodes.push(node.into());
        self
    }

    pub fn iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn total_iterations(mut self, total: u32) -> Self {
        self.total_iterations = Some(total);
        self
    }

    pub fn agent_context(mut self, ctx: Value) -> Self {
        self.agent_context = Some(ctx);
        self
    }

    pub fn global_context(mut self, ctx: Map<String, Value>) -> Self {
        self.global_context = Some(ctx);
        self
    }

    pub fn tool_result(mut self, entry: ToolResultEntry) -> Self {
        self.append_tool_results.push(entry);
        self
    }
}

/// Status projection returned by `get_checkpoint_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStatusView {
    pub exists: bool,
    pub status: Option<CheckpointStatus>,
    pub iteration: Option<u32>,
    pub failure_point: Option<String>,
    pub timestamp: Option<i64>,
}

impl CheckpointStatusView {
    /// View for a task with no checkpoint
    pub fn missing() -> Self {
        Self {
            exists: false,
            status: None,
            iteration: None,
            failure_point: None,
            timestamp: None,
        }
    }
}

/// Whether and how much of a task can be resumed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySummary {
    pub task_id: String,
    pub can_recover: bool,
    pub status: CheckpointStatus,
    /// Integer percent, truncated
    pub progress: u32,
    pub completed_nodes: usize,
    pub total_iterations: u32,
    pub estimated_tokens_saved: u64,
    pub failure_reason: Option<String>,
    pub retry_count: u32,
    pub last_checkpoint: i64,
}
