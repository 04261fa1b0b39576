//! Scheduler implementation

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::config::{SchedulerConfig, validate_max_concurrent};
use super::error::SchedulerError;
use super::queue::{QueueEntry, QueueEntryStatus, QueueState, QueuedTask, ScheduleResult, SchedulerStats};

/// Internal state protected by mutex
struct SchedulerInner {
    max_concurrent: usize,

    /// Waiting tasks, admission order
    queue: VecDeque<QueuedTask>,

    /// Tasks holding a slot
    running: HashMap<String, QueuedTask>,

    stats: SchedulerStats,
}

impl SchedulerInner {
    fn start(&mut self, mut task: QueuedTask) -> QueuedTask {
        task.started_at = Some(Instant::now());
        self.running.insert(task.task_id.clone(), task.clone());
        self.stats.total_scheduled += 1;
        self.stats.peak_concurrent = self.stats.peak_concurrent.max(self.running.len());
        task
    }

    /// Move queued tasks into free slots, head first
    fn promote(&mut self) -> Vec<QueuedTask> {
        let mut promoted = Vec::new();
        while self.running.len() < self.max_concurrent {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            debug!(task_id = %next.task_id, "SchedulerInner::promote: promoting from queue");
            promoted.push(self.start(next));
        }
        promoted
    }
}

/// The Scheduler caps concurrently running tasks and queues the overflow
/// in strict FIFO order.
pub struct Scheduler {
    inner: Mutex<SchedulerInner>,
}

impl Scheduler {
    /// Create a new scheduler; the cap must be within 1..=5
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        debug!(?config, "Scheduler::new: called");
        let max_concurrent = validate_max_concurrent(config.max_concurrent)?;
        Ok(Self {
            inner: Mutex::new(SchedulerInner {
                max_concurrent,
                queue: VecDeque::new(),
                running: HashMap::new(),
                stats: SchedulerStats::default(),
            }),
        })
    }

    /// Attempt to schedule a task
    pub async fn schedule(&self, task: QueuedTask) -> ScheduleResult {
        debug!(task_id = %task.task_id, "Scheduler::schedule: called");
        let mut inner = self.inner.lock().await;

        if inner.running.contains_key(&task.task_id) {
            debug!(task_id = %task.task_id, "Scheduler::schedule: already running, rejecting");
            return ScheduleResult::Rejected {
                reason: "Already running".to_string(),
            };
        }

        if inner.queue.iter().any(|t| t.task_id == task.task_id) {
            debug!(task_id = %task.task_id, "Scheduler::schedule: already queued, rejecting");
            return ScheduleResult::Rejected {
                reason: "Already queued".to_string(),
            };
        }

        if inner.running.len() < inner.max_concurrent {
            debug!(task_id = %task.task_id, "Scheduler::schedule: under concurrent limit, running immediately");
            inner.start(task);
            return ScheduleResult::Ready;
        }

        debug!(task_id = %task.task_id, "Scheduler::schedule: concurrent limit reached, queuing");
        let task_id = task.task_id.clone();
        inner.queue.push_back(task);
        inner.stats.total_queued += 1;
        inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.queue.len());

        let position = inner.queue.len();
        info!(%task_id, position, "Task queued");
        ScheduleResult::Queued { position }
    }

    /// Release a task's slot and promote the head of the queue
    pub async fn complete(&self, task_id: &str) -> Option<QueuedTask> {
        debug!(%task_id, "Scheduler::complete: called");
        let mut inner = self.inner.lock().await;

        if let Some(task) = inner.running.remove(task_id) {
            debug!(%task_id, "Scheduler::complete: found in running, removing");
            if let Some(started) = task.started_at {
                inner.stats.total_run_time_ms += started.elapsed().as_millis() as u64;
            }
            inner.stats.total_completed += 1;
        } else {
            debug!(%task_id, "Scheduler::complete: not found in running");
        }

        // A lowered cap can leave no free slot even after a release
        inner.promote().into_iter().next()
    }

    /// Remove a queued task; running tasks cannot be cancelled here
    pub async fn cancel(&self, task_id: &str) -> bool {
        debug!(%task_id, "Scheduler::cancel: called");
        let mut inner = self.inner.lock().await;

        if inner.running.contains_key(task_id) {
            debug!(%task_id, "Scheduler::cancel: is running, cannot cancel");
            return false;
        }

        let original_len = inner.queue.len();
        inner.queue.retain(|t| t.task_id != task_id);
        let removed = original_len != inner.queue.len();
        if removed {
            debug!(%task_id, "Scheduler::cancel: removed from queue");
            inner.stats.total_cancelled += 1;
        } else {
            debug!(%task_id, "Scheduler::cancel: not found in queue");
        }
        removed
    }

    /// Change the cap at runtime; returns tasks promoted by a raised cap
    ///
    /// Lowering the cap never stops running tasks; the queue simply waits
    /// until enough of them finish.
    pub async fn set_max_concurrent(&self, value: usize) -> Result<Vec<QueuedTask>, SchedulerError> {
        debug!(value, "Scheduler::set_max_concurrent: called");
        let value = validate_max_concurrent(value)?;
        let mut inner = self.inner.lock().await;
        let previous = inner.max_concurrent;
        inner.max_concurrent = value;
        info!(previous, current = value, "Updated max concurrent tasks");
        Ok(inner.promote())
    }

    pub async fn max_concurrent(&self) -> usize {
        self.inner.lock().await.max_concurrent
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.inner.lock().await.running.contains_key(task_id)
    }

    pub async fn is_queued(&self, task_id: &str) -> bool {
        self.inner.lock().await.queue.iter().any(|t| t.task_id == task_id)
    }

    /// Get current queue state
    pub async fn queue_state(&self) -> QueueState {
        debug!("Scheduler::queue_state: called");
        let inner = self.inner.lock().await;

        QueueState {
            running: inner.running.len(),
            queued: inner.queue.len(),
            max_concurrent: inner.max_concurrent,
            stats: inner.stats.clone(),
        }
    }

    /// Running tasks (oldest first) followed by the queue in admission order
    pub async fn queue_details(&self) -> Vec<QueueEntry> {
        debug!("Scheduler::queue_details: called");
        let inner = self.inner.lock().await;
        let now = Instant::now();

        let mut running: Vec<_> = inner.running.values().collect();
        running.sort_by_key(|t| t.started_at);

        running
            .into_iter()
            .map(|t| QueueEntry {
                task_id: t.task_id.clone(),
                task_name: t.task_name.clone(),
                status: QueueEntryStatus::Running,
                wait_time: t.started_at.map(|s| now - s),
            })
            .chain(inner.queue.iter().map(|t| QueueEntry {
                task_id: t.task_id.clone(),
                task_name: t.task_name.clone(),
                status: QueueEntryStatus::Queued,
                wait_time: Some(now - t.submitted_at),
            }))
            .collect()
    }

    /// Get the scheduler statistics
    pub async fn stats(&self) -> SchedulerStats {
        debug!("Scheduler::stats: called");
        self.inner.lock().await.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> QueuedTask {
        QueuedTask::new(id, format!("task {}", id), 5)
    }

    fn scheduler(max_concurrent: usize) -> Scheduler {
        Scheduler::new(SchedulerConfig { max_concurrent }).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_limit() {
        let scheduler = scheduler(3);

        for id in ["a", "b", "c"] {
            assert_eq!(scheduler.schedule(task(id)).await, ScheduleResult::Ready);
        }

        // Fourth should be queued, not run
        assert_eq!(scheduler.schedule(task("d")).await, ScheduleResult::Queued { position: 1 });
        assert!(scheduler.is_queued("d").await);
        assert!(!scheduler.is_running("d").await);

        // Completing one admits the fourth automatically
        let promoted = scheduler.complete("a").await.unwrap();
        assert_eq!(promoted.task_id, "d");
        assert!(promoted.started_at.is_some());

        let state = scheduler.queue_state().await;
        assert_eq!(state.running, 3);
        assert_eq!(state.queued, 0);
    }

    #[tokio::test]
    async fn test_fifo_ordering() {
        let scheduler = scheduler(1);

        scheduler.schedule(task("running")).await;
        assert_eq!(scheduler.schedule(task("first")).await, ScheduleResult::Queued { position: 1 });
        assert_eq!(scheduler.schedule(task("second")).await, ScheduleResult::Queued { position: 2 });
        scheduler.schedule(task("third")).await;

        assert_eq!(scheduler.complete("running").await.unwrap().task_id, "first");
        assert_eq!(scheduler.complete("first").await.unwrap().task_id, "second");
        assert_eq!(scheduler.complete("second").await.unwrap().task_id, "third");
        assert!(scheduler.complete("third").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_rejection() {
        let scheduler = scheduler(1);

        assert_eq!(scheduler.schedule(task("test")).await, ScheduleResult::Ready);
        assert!(matches!(
            scheduler.schedule(task("test")).await,
            ScheduleResult::Rejected { .. }
        ));

        scheduler.schedule(task("queued")).await;
        assert!(matches!(
            scheduler.schedule(task("queued")).await,
            ScheduleResult::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel() {
        let scheduler = scheduler(1);

        scheduler.schedule(task("running")).await;
        scheduler.schedule(task("queued")).await;

        assert!(scheduler.cancel("queued").await);
        assert!(!scheduler.cancel("running").await);
        assert!(!scheduler.cancel("unknown").await);

        assert!(scheduler.complete("running").await.is_none());
        let state = scheduler.queue_state().await;
        assert_eq!(state.running, 0);
        assert_eq!(state.queued, 0);
        assert_eq!(state.stats.total_cancelled, 1);
    }

    #[tokio::test]
    async fn test_new_rejects_out_of_range() {
        assert!(Scheduler::new(SchedulerConfig { max_concurrent: 0 }).is_err());
        assert!(Scheduler::new(SchedulerConfig { max_concurrent: 6 }).is_err());
    }

    #[tokio::test]
    async fn test_raising_cap_promotes() {
        let scheduler = scheduler(1);
        for id in ["a", "b", "c"] {
            scheduler.schedule(task(id)).await;
        }

        let promoted = scheduler.set_max_concurrent(3).await.unwrap();
        let ids: Vec<_> = promoted.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(scheduler.queue_state().await.running, 3);
    }

    #[tokio::test]
    async fn test_lowering_cap_holds_queue() {
        let scheduler = scheduler(3);
        for id in ["a", "b", "c", "d"] {
            scheduler.schedule(task(id)).await;
        }

        assert!(scheduler.set_max_concurrent(1).await.unwrap().is_empty());
        // Two still above the new cap, so no promotion yet
        assert!(scheduler.complete("a").await.is_none());
        assert!(scheduler.complete("b").await.is_none());
        assert_eq!(scheduler.complete("c").await.unwrap().task_id, "d");
    }

    #[tokio::test]
    async fn test_set_max_concurrent_rejects_out_of_range() {
        let scheduler = scheduler(3);
        let err = scheduler.set_max_concurrent(9).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConcurrency { value: 9, .. }));
        assert_eq!(scheduler.max_concurrent().await, 3);
    }

    #[tokio::test]
    async fn test_queue_details_order() {
        let scheduler = scheduler(1);
        scheduler.schedule(task("run")).await;
        scheduler.schedule(task("q1")).await;
        scheduler.schedule(task("q2")).await;

        let details = scheduler.queue_details().await;
        let ids: Vec<_> = details.iter().map(|e| e.task_id.as_str()).collect();
        assert_eq!(ids, vec!["run", "q1", "q2"]);
        assert_eq!(details[0].status, QueueEntryStatus::Running);
        assert_eq!(details[2].status, QueueEntryStatus::Queued);
    }

    #[tokio::test]
    async fn test_stats_tracking() {
        let scheduler = scheduler(2);

        scheduler.schedule(task("a")).await;
        scheduler.schedule(task("b")).await;
        scheduler.schedule(task("c")).await;

        scheduler.complete("a").await;
        scheduler.complete("b").await;
        scheduler.complete("c").await;

        let stats = scheduler.stats().await;
        assert_eq!(stats.total_scheduled, 3);
        assert_eq!(stats.total_completed, 3);
        assert_eq!(stats.total_queued, 1);
        assert_eq!(stats.peak_concurrent, 2);
        assert_eq!(stats.peak_queue_depth, 1);
    }
}
