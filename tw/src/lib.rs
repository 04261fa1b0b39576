//! TaskWarden - checkpoint and recovery core for long-running agent tasks
//!
//! Every task an LLM agent runs gets a durable checkpoint, so a crash, a
//! pause or a failure loses at most the steps since the last progress write.
//!
//! # Core Concepts
//!
//! - **Single Writer**: one actor owns the checkpoint store
//! - **Explicit Lifecycle**: `in_progress`, `paused`, `failed`, `completed`, with checked transitions
//! - **Isolated Windows**: each task runs in its own execution window and agent context
//! - **Bounded Concurrency**: a FIFO queue behind a runtime-adjustable cap
//!
//! # Modules
//!
//! - [`checkpoint`] - Checkpoint manager actor and startup recovery
//! - [`context`] - Per-window agent context with compression
//! - [`scheduler`] - Concurrency cap, FIFO queue and timers
//! - [`orchestrator`] - Task lifecycle driver over an [`orchestrator::ExecutionEngine`]
//! - [`events`] - Lifecycle event broadcast
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod scheduler;

// Re-export commonly used types
pub use checkpoint::{CheckpointError, CheckpointManager, RecoveryStats, recover, scan_for_recovery};
pub use config::Config;
pub use context::{AgentContextManager, CompressionStats, ContextError};
pub use domain::{
    AgentState, Checkpoint, CheckpointPatch, CheckpointStatus, CheckpointStatusView, NewCheckpoint, RecoverySummary,
    ToolResultEntry, Transition, WindowContext,
};
pub use error::{ErrorCode, ErrorInfo};
pub use events::{EventBus, TaskEvent};
pub use orchestrator::{
    CloseConfirmer, CloseOutcome, EngineError, ExecutionEngine, ExecutionOutcome, ExecutionRequest,
    OrchestratorConfig, OrchestratorError, PauseOutcome, ProgressReporter, SubmitOutcome, TaskOrchestrator, TaskRequest,
};
pub use scheduler::{QueueState, ScheduleResult, ScheduleSpec, Scheduler, SchedulerConfig, SchedulerError};
