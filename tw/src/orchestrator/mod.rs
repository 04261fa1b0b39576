//! Task orchestration
//!
//! Admits tasks through the [`crate::scheduler::Scheduler`], gives each one an
//! isolated execution window, and drives its checkpoint from creation to a
//! terminal state.

mod core;
mod engine;
mod error;
mod window;

pub use core::{OrchestratorConfig, PauseOutcome, SubmitOutcome, TaskOrchestrator, TaskRequest, WINDOW_CLOSED_REASON};
pub use engine::{EngineError, ExecutionEngine, ExecutionOutcome, ExecutionRequest, ProgressReporter};
pub use error::OrchestratorError;
pub use window::{CloseConfirmer, CloseOutcome, ExecutionWindow, WindowLease, WindowRegistry};
