//! Task lifecycle events

use serde::{Deserialize, Serialize};

/// Observable task lifecycle activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    /// Admitted and handed to the engine
    Started {
        task_id: String,
        window_id: String,
        execution_id: String,
    },
    /// Waiting for a free slot
    Queued { task_id: String, position: usize },
    /// Engine reported a result
    Completed { task_id: String, execution_id: String },
    /// Engine reported or raised an error
    Failed {
        task_id: String,
        execution_id: String,
        message: String,
    },
    /// Forcibly stopped by a window close
    Aborted { task_id: String, reason: String },
    /// Paused; checkpoint preserved
    Paused { task_id: String },
    /// Resumed from a checkpoint
    Resumed { task_id: String, retry_count: u32 },
}

impl TaskEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            TaskEvent::Started { .. } => "Started",
            TaskEvent::Queued { .. } => "Queued",
            TaskEvent::Completed { .. } => "Completed",
            TaskEvent::Failed { .. } => "Failed",
            TaskEvent::Aborted { .. } => "Aborted",
            TaskEvent::Paused { .. } => "Paused",
            TaskEvent::Resumed { .. } => "Resumed",
        }
    }

    /// Task the event is about
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::Started { task_id, .. }
            | TaskEvent::Queued { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::Aborted { task_id, .. }
            | TaskEvent::Paused { task_id }
            | TaskEvent::Resumed { task_id, .. } => task_id,
        }
    }

    /// Terminal for the current run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Completed { .. } | TaskEvent::Failed { .. } | TaskEvent::Aborted { .. } | TaskEvent::Paused { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let event = TaskEvent::Aborted {
            task_id: "T1".into(),
            reason: "window closed".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "Aborted");
        assert_eq!(value["reason"], "window closed");
        assert_eq!(event.task_id(), "T1");
        assert!(event.is_terminal());
    }
}
