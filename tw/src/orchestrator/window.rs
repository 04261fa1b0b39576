//! Execution windows
//!
//! One isolated execution session per task. Re-opening a task's window keeps
//! the window id but hands out a fresh execution id and cancel token.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::engine::ProgressReporter;
use super::error::OrchestratorError;
use crate::domain::{generate_id, now_ms};

/// A live execution session
#[derive(Clone)]
pub struct ExecutionWindow {
    pub window_id: String,
    pub task_id: String,
    pub execution_id: String,
    pub cancel: CancellationToken,
    pub sub_task_ids: Vec<String>,
    pub opened_at: i64,
    pub(crate) progress: Option<ProgressReporter>,
}

impl std::fmt::Debug for ExecutionWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionWindow")
            .field("window_id", &self.window_id)
            .field("task_id", &self.task_id)
            .field("execution_id", &self.execution_id)
            .field("sub_task_ids", &self.sub_task_ids)
            .finish_non_exhaustive()
    }
}

/// Handed back by [`WindowRegistry::open`]
#[derive(Debug, Clone)]
pub struct WindowLease {
    pub window_id: String,
    pub execution_id: String,
    pub cancel: CancellationToken,
    /// True when an existing window was taken over
    pub reused: bool,
}

#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: HashMap<String, ExecutionWindow>,
    by_task: HashMap<String, String>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or take over) the window for `task_id`
    ///
    /// Taking over cancels the previous execution's token. A new window
    /// beyond `limit` fails with `ConcurrencyLimit`.
    pub fn open(&mut self, task_id: &str, task_name: &str, limit: usize) -> Result<WindowLease, OrchestratorError> {
        debug!(%task_id, limit, "WindowRegistry::open: called");
        let execution_id = generate_id("exec", task_name);
        let cancel = CancellationToken::new();

        if let Some(window_id) = self.by_task.get(task_id)
            && let Some(window) = self.windows.get_mut(window_id)
        {
            debug!(%task_id, %window_id, "WindowRegistry::open: reusing window");
            window.cancel.cancel();
            window.cancel = cancel.clone();
            window.execution_id = execution_id.clone();
            window.sub_task_ids.clear();
            window.progress = None;
            return Ok(WindowLease {
                window_id: window.window_id.clone(),
                execution_id,
                cancel,
                reused: true,
            });
        }

        if self.windows.len() >= limit {
            debug!(%task_id, open = self.windows.len(), "WindowRegistry::open: at limit");
            return Err(OrchestratorError::ConcurrencyLimit { limit });
        }

        let window_id = generate_id("win", task_name);
        self.by_task.insert(task_id.to_string(), window_id.clone());
        self.windows.insert(
            window_id.clone(),
            ExecutionWindow {
                window_id: window_id.clone(),
                task_id: task_id.to_string(),
                execution_id: execution_id.clone(),
                cancel: cancel.clone(),
                sub_task_ids: Vec::new(),
                opened_at: now_ms(),
                progress: None,
            },
        );
        Ok(WindowLease {
            window_id,
            execution_id,
            cancel,
            reused: false,
        })
    }

    pub fn get(&self, window_id: &str) -> Option<&ExecutionWindow> {
        self.windows.get(window_id)
    }

    pub fn find_by_task(&self, task_id: &str) -> Option<&ExecutionWindow> {
        self.by_task.get(task_id).and_then(|id| self.windows.get(id))
    }

    /// True while `execution_id` is the window's live execution
    pub fn is_current(&self, window_id: &str, execution_id: &str) -> bool {
        self.windows
            .get(window_id)
            .is_some_and(|w| w.execution_id == execution_id)
    }

    pub fn attach_progress(&mut self, window_id: &str, execution_id: &str, progress: ProgressReporter) {
        if let Some(window) = self.windows.get_mut(window_id)
            && window.execution_id == execution_id
        {
            window.progress = Some(progress);
        }
    }

    pub fn add_sub_task(&mut self, window_id: &str, sub_task_id: &str) -> bool {
        match self.windows.get_mut(window_id) {
            Some(window) => {
                if !window.sub_task_ids.iter().any(|id| id == sub_task_id) {
                    window.sub_task_ids.push(sub_task_id.to_string());
                }
                true
            }
            None => false,
        }
    }

    /// Tear a window down, returning it
    pub fn close(&mut self, window_id: &str) -> Option<ExecutionWindow> {
        debug!(%window_id, "WindowRegistry::close: called");
        let window = self.windows.remove(window_id)?;
        if self.by_task.get(&window.task_id).is_some_and(|id| id == window_id) {
            self.by_task.remove(&window.task_id);
        }
        Some(window)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn windows(&self) -> Vec<ExecutionWindow> {
        let mut windows: Vec<_> = self.windows.values().cloned().collect();
        windows.sort_by_key(|w| w.opened_at);
        windows
    }
}

/// Asks whether an in-progress task may be aborted by a window close
#[async_trait]
pub trait CloseConfirmer: Send + Sync {
    async fn confirm(&self, window_id: &str, task_id: &str) -> bool;
}

#[async_trait]
impl CloseConfirmer for bool {
    async fn confirm(&self, _window_id: &str, _task_id: &str) -> bool {
        *self
    }
}

/// Result of [`crate::orchestrator::TaskOrchestrator::close_window`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Nothing was running; the window was torn down
    Closed,
    /// The running task was aborted and its checkpoint paused
    Aborted { task_id: String },
    /// The confirmer declined; the window stays open
    Vetoed,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_respects_limit() {
        let mut registry = WindowRegistry::new();
        registry.open("T1", "one", 2).unwrap();
        registry.open("T2", "two", 2).unwrap();

        let err = registry.open("T3", "three", 2).unwrap_err();
        assert!(matches!(err, OrchestratorError::ConcurrencyLimit { limit: 2 }));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reopen_reuses_window_and_cancels_previous() {
        let mut registry = WindowRegistry::new();
        let first = registry.open("T1", "one", 1).unwrap();
        assert!(!first.reused);

        // Reuse does not count against the limit
        let second = registry.open("T1", "one", 1).unwrap();
        assert!(second.reused);
        assert_eq!(first.window_id, second.window_id);
        assert_ne!(first.execution_id, second.execution_id);
        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());

        assert!(!registry.is_current(&first.window_id, &first.execution_id));
        assert!(registry.is_current(&second.window_id, &second.execution_id));
    }

    #[test]
    fn test_close_clears_task_index() {
        let mut registry = WindowRegistry::new();
        let lease = registry.open("T1", "one", 3).unwrap();
        assert!(registry.add_sub_task(&lease.window_id, "T1-sub"));
        assert!(registry.add_sub_task(&lease.window_id, "T1-sub"));

        let closed = registry.close(&lease.window_id).unwrap();
        assert_eq!(closed.sub_task_ids, vec!["T1-sub"]);
        assert!(registry.find_by_task("T1").is_none());
        assert!(registry.is_empty());
        assert!(registry.close(&lease.window_id).is_none());
    }

    #[tokio::test]
    async fn test_bool_confirmer() {
        assert!(true.confirm("w", "t").await);
        assert!(!false.confirm("w", "t").await);
    }
}
