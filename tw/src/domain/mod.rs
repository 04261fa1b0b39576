//! Domain types for TaskWarden
//!
//! Checkpoint (one per task, persisted through CheckpointStore) and the
//! per-window agent context types.

mod checkpoint;
mod context;
mod id;

pub use checkpoint::{
    Checkpoint, CheckpointMeta, CheckpointPatch, CheckpointStatus, CheckpointStatusView, FailureInfo,
    NewCheckpoint, RecoverySummary, ToolResultEntry, Transition, COMPLETION_TOOL_NAME,
};
pub use context::{AgentState, ContextTransfer, Variables, WindowContext};
pub use id::{generate_id, slugify};

// Re-export store types for convenience
pub use checkpointstore::{Record, now_ms};
