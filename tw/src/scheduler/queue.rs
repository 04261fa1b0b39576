//! Queue types for the scheduler

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::domain::now_ms;

/// Result of scheduling attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleResult {
    /// Can execute immediately
    Ready,

    /// Queued, waiting for slot (1-based)
    Queued { position: usize },

    /// Request rejected (duplicate)
    Rejected { reason: String },
}

/// A task waiting for, or holding, a slot
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: String,
    pub task_name: String,
    pub steps: usize,
    /// Wall-clock submission time (Unix milliseconds)
    pub scheduled_time: i64,
    pub submitted_at: Instant,
    pub started_at: Option<Instant>,
}

impl QueuedTask {
    pub fn new(task_id: impl Into<String>, task_name: impl Into<String>, steps: usize) -> Self {
        Self {
            task_id: task_id.into(),
            task_name: task_name.into(),
            steps,
            scheduled_time: now_ms(),
            submitted_at: Instant::now(),
            started_at: None,
        }
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id
    }
}

impl Eq for QueuedTask {}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_queued: u64,
    pub total_cancelled: u64,
    pub total_run_time_ms: u64,
    pub peak_queue_depth: usize,
    pub peak_concurrent: usize,
}

/// Queue state for UI/CLI display
#[derive(Debug, Clone, Serialize)]
pub struct QueueState {
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub stats: SchedulerStats,
}

/// Queue entry for UI/CLI display
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task_id: String,
    pub task_name: String,
    pub status: QueueEntryStatus,
    pub wait_time: Option<Duration>,
}

/// Status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntryStatus {
    Running,
    Queued,
}
