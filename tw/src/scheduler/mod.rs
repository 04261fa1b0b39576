//! Task admission
//!
//! A FIFO scheduler enforcing the concurrency cap, plus one-shot and
//! interval timers for delayed submissions.

mod config;
mod core;
mod error;
mod queue;
mod timer;

pub use config::{SchedulerConfig, validate_max_concurrent};
pub use core::Scheduler;
pub use error::SchedulerError;
pub use queue::{QueueEntry, QueueEntryStatus, QueueState, QueuedTask, ScheduleResult, SchedulerStats};
pub use timer::{ScheduleSpec, TimerRegistry};
