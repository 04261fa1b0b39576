//! TaskOrchestrator drives tasks from admission to a terminal checkpoint

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::{EngineError, ExecutionEngine, ExecutionOutcome, ExecutionRequest, ProgressReporter};
use super::error::OrchestratorError;
use super::window::{CloseConfirmer, CloseOutcome, ExecutionWindow, WindowRegistry};
use crate::checkpoint::{CheckpointManager, RecoveryStats};
use crate::config::{CheckpointConfig, Config};
use crate::context::AgentContextManager;
use crate::domain::{Checkpoint, CheckpointPatch, CheckpointStatus, NewCheckpoint};
use crate::error::{ErrorCode, ErrorInfo};
use crate::events::{EventBus, TaskEvent};
use crate::scheduler::{
    QueueEntry, QueueState, QueuedTask, ScheduleResult, ScheduleSpec, Scheduler, SchedulerConfig, TimerRegistry,
};

/// Abort reason recorded when a window is closed under a running task
pub const WINDOW_CLOSED_REASON: &str = "Execution window closed by user";

const PAUSED_REASON: &str = "Paused by user";
const SUPERSEDED_REASON: &str = "Superseded by a new execution";

/// A task to run
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub task_id: String,
    pub task_name: String,
    pub workflow_xml: String,
    pub steps: usize,
    pub agents: Vec<String>,
    /// Steps between progress writes; falls back to the configured default
    pub checkpoint_interval: Option<u32>,
}

impl TaskRequest {
    pub fn new(task_id: impl Into<String>, task_name: impl Into<String>, workflow_xml: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_name: task_name.into(),
            workflow_xml: workflow_xml.into(),
            ..Default::default()
        }
    }

    pub fn steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn agents(mut self, agents: Vec<String>) -> Self {
        self.agents = agents;
        self
    }

    pub fn checkpoint_interval(mut self, interval: u32) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }
}

/// What `submit` / `resume` did with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started {
        window_id: String,
        execution_id: String,
        reused: bool,
    },
    /// Waiting for a free slot (1-based)
    Queued { position: usize },
}

/// What `pause` did with a task
#[derive(Debug, Clone, PartialEq)]
pub enum PauseOutcome {
    /// Stopped (or idle) and the checkpoint is now paused
    Paused(Checkpoint),
    /// Taken off the queue before it started; only a queued resume has a checkpoint
    Dequeued { checkpoint: Option<Checkpoint> },
    /// Nothing queued, running or checkpointed under this id
    NotFound,
}

impl PauseOutcome {
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            Self::Paused(cp) => Some(cp),
            Self::Dequeued { checkpoint } => checkpoint.as_ref(),
            Self::NotFound => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub default_checkpoint_interval: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_checkpoint_interval: 1,
        }
    }
}

impl From<&CheckpointConfig> for OrchestratorConfig {
    fn from(config: &CheckpointConfig) -> Self {
        Self {
            default_checkpoint_interval: config.default_interval.max(1),
        }
    }
}

/// A request parked until it can launch
struct PendingLaunch {
    request: TaskRequest,
    /// Set when continuing a resumed checkpoint
    resumed: Option<Checkpoint>,
}

struct OrchestratorInner {
    checkpoints: CheckpointManager,
    contexts: AgentContextManager,
    scheduler: Scheduler,
    timers: TimerRegistry,
    engine: Arc<dyn ExecutionEngine>,
    events: EventBus,
    windows: Mutex<WindowRegistry>,
    pending: Mutex<HashMap<String, PendingLaunch>>,
    config: OrchestratorConfig,
    /// Stops background work started by `new`
    background: CancellationToken,
}

/// Handle to the orchestrator; cheap to clone
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator").finish_non_exhaustive()
    }
}

impl TaskOrchestrator {
    /// Wire up the collaborators and start the periodic context sweep
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        checkpoints: CheckpointManager,
        contexts: AgentContextManager,
        engine: Arc<dyn ExecutionEngine>,
        scheduler_config: SchedulerConfig,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        debug!(?scheduler_config, ?config, "TaskOrchestrator::new: called");
        let scheduler = Scheduler::new(scheduler_config)?;

        let background = CancellationToken::new();
        contexts.spawn_cleanup_task(background.child_token());

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                checkpoints,
                contexts,
                scheduler,
                timers: TimerRegistry::new(),
                engine,
                events: EventBus::with_default_capacity(),
                windows: Mutex::new(WindowRegistry::new()),
                pending: Mutex::new(HashMap::new()),
                config,
                background,
            }),
        })
    }

    /// Build every collaborator from application config
    pub fn from_config(config: &Config, engine: Arc<dyn ExecutionEngine>) -> Result<Self, OrchestratorError> {
        let checkpoints = CheckpointManager::spawn(config.storage.resolved_checkpoint_dir(), &config.checkpoint)?;
        let contexts = AgentContextManager::new(config.context.clone());
        Self::new(
            checkpoints,
            contexts,
            engine,
            SchedulerConfig::from(&config.concurrency),
            OrchestratorConfig::from(&config.checkpoint),
        )
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.inner.checkpoints
    }

    pub fn contexts(&self) -> &AgentContextManager {
        &self.inner.contexts
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Submit a task for execution
    ///
    /// A task that already has a window is restarted in place; otherwise it
    /// goes through the scheduler and either starts now or waits in FIFO order.
    pub async fn submit(&self, request: TaskRequest) -> Result<SubmitOutcome, OrchestratorError> {
        debug!(task_id = %request.task_id, "TaskOrchestrator::submit: called");
        let has_window = self.inner.windows.lock().await.find_by_task(&request.task_id).is_some();

        let pending = PendingLaunch {
            request,
            resumed: None,
        };
        if has_window {
            debug!(task_id = %pending.request.task_id, "TaskOrchestrator::submit: window exists, restarting");
            return self.launch(pending).await;
        }
        self.admit(pending).await
    }

    async fn admit(&self, pending: PendingLaunch) -> Result<SubmitOutcome, OrchestratorError> {
        let task_id = pending.request.task_id.clone();
        debug!(%task_id, "TaskOrchestrator::admit: called");

        // Held across scheduling so a promotion never races the insert below
        let mut parked = self.inner.pending.lock().await;
        if parked.contains_key(&task_id) {
            return Err(OrchestratorError::Rejected {
                task_id,
                reason: "Already queued".to_string(),
            });
        }

        let task = QueuedTask::new(&task_id, &pending.request.task_name, pending.request.steps);
        match self.inner.scheduler.schedule(task).await {
            ScheduleResult::Ready => {
                drop(parked);
                self.launch(pending).await
            }
            ScheduleResult::Queued { position } => {
                parked.insert(task_id.clone(), pending);
                drop(parked);
                self.inner.events.emit(TaskEvent::Queued { task_id, position });
                Ok(SubmitOutcome::Queued { position })
            }
            ScheduleResult::Rejected { reason } => {
                debug!(%task_id, %reason, "TaskOrchestrator::admit: rejected");
                Err(OrchestratorError::Rejected { task_id, reason })
            }
        }
    }

    /// Open the window, prepare context and checkpoint, then spawn the run
    ///
    /// The caller already holds a scheduler slot for the task.
    fn launch(&self, pending: PendingLaunch) -> BoxFuture<'static, Result<SubmitOutcome, OrchestratorError>> {
        let this = self.clone();
        async move {
            let PendingLaunch { request, resumed } = pending;
            let task_id = request.task_id.clone();
            debug!(%task_id, resumed = resumed.is_some(), "TaskOrchestrator::launch: called");

            let limit = this.inner.scheduler.max_concurrent().await;
            let opened = this.inner.windows.lock().await.open(&task_id, &request.task_name, limit);
            let lease = match opened {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(%task_id, error = %e, "Failed to open execution window");
                    this.release_slot(&task_id).await;
                    return Err(e);
                }
            };

            if lease.reused
                && let Err(e) = this.inner.engine.abort(&task_id, SUPERSEDED_REASON).await
            {
                warn!(%task_id, error = %e, "Failed to abort previous execution");
            }

            this.inner.contexts.initialize_window_context(&lease.window_id).await;

            let is_resumed = resumed.is_some();
            let checkpoint = match resumed {
                Some(checkpoint) => {
                    if !checkpoint.agent_context.is_null()
                        && let Err(e) = this
                            .inner
                            .contexts
                            .import_context(&lease.window_id, checkpoint.agent_context.clone())
                            .await
                    {
                        warn!(%task_id, error = %e, "Saved agent context could not be restored");
                    }
                    checkpoint
                }
                None => {
                    let total = u32::try_from(request.steps).unwrap_or(u32::MAX);
                    let init = NewCheckpoint::new(&task_id, &request.workflow_xml).meta(0, total);
                    match this.inner.checkpoints.create_checkpoint(init).await {
                        Ok(checkpoint) => checkpoint,
                        Err(e) => {
                            error!(%task_id, error = %e, "Failed to create initial checkpoint");
                            this.teardown(&lease.window_id, &lease.execution_id).await;
                            return Err(e.into());
                        }
                    }
                }
            };

            let interval = request
                .checkpoint_interval
                .unwrap_or(this.inner.config.default_checkpoint_interval);
            let progress = ProgressReporter::new(
                this.inner.checkpoints.clone(),
                &task_id,
                checkpoint.current_node_index,
                interval,
                lease.cancel.clone(),
            );
            this.inner
                .windows
                .lock()
                .await
                .attach_progress(&lease.window_id, &lease.execution_id, progress.clone());

            let exec_request = ExecutionRequest {
                task_id: task_id.clone(),
                execution_id: lease.execution_id.clone(),
                window_id: lease.window_id.clone(),
                task_name: request.task_name,
                workflow_xml: checkpoint.workflow_xml.clone(),
                steps: request.steps,
                agents: request.agents,
                start_node_index: checkpoint.current_node_index,
                completed_nodes: checkpoint.completed_nodes.clone(),
                resumed: is_resumed,
            };

            info!(
                %task_id,
                window_id = %lease.window_id,
                execution_id = %lease.execution_id,
                reused = lease.reused,
                "Task started"
            );
            this.inner.events.emit(TaskEvent::Started {
                task_id,
                window_id: lease.window_id.clone(),
                execution_id: lease.execution_id.clone(),
            });

            tokio::spawn(this.run_execution(exec_request, progress, lease.cancel.clone()));

            Ok(SubmitOutcome::Started {
                window_id: lease.window_id,
                execution_id: lease.execution_id,
                reused: lease.reused,
            })
        }
        .boxed()
    }

    fn run_execution(
        &self,
        request: ExecutionRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            let task_id = request.task_id.clone();
            let window_id = request.window_id.clone();
            let execution_id = request.execution_id.clone();

            let result = AssertUnwindSafe(this.inner.engine.execute(request, progress.clone(), cancel.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    error!(%task_id, %execution_id, %message, "Execution engine panicked");
                    Err(EngineError::new(format!("Execution engine panicked: {}", message)))
                });

            // Pause, close and restart do their own bookkeeping
            if cancel.is_cancelled() {
                debug!(%task_id, %execution_id, "run_execution: cancelled, leaving cleanup to the canceller");
                return;
            }
            if !this.inner.windows.lock().await.is_current(&window_id, &execution_id) {
                debug!(%task_id, %execution_id, "run_execution: stale execution");
                return;
            }

            if let Err(e) = progress.flush().await {
                warn!(%task_id, error = %e, "Failed to write final progress");
            }

            match result {
                Ok(ExecutionOutcome { error: Some(err), .. }) | Err(err) => {
                    this.finish_failed(&task_id, &window_id, &execution_id, err).await;
                }
                Ok(outcome) => {
                    this.finish_completed(&task_id, &window_id, &execution_id, outcome).await;
                }
            }
        }
        .boxed()
    }

    async fn finish_completed(&self, task_id: &str, window_id: &str, execution_id: &str, outcome: ExecutionOutcome) {
        debug!(%task_id, %execution_id, "TaskOrchestrator::finish_completed: called");
        match self.inner.checkpoints.complete_checkpoint(task_id, outcome.result).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(%task_id, "Completed task has no checkpoint"),
            Err(e) => error!(%task_id, error = %e, "Failed to complete checkpoint"),
        }

        let mut final_id = task_id.to_string();
        if let Some(canonical) = outcome.task_id.filter(|id| id != task_id) {
            match self
                .inner
                .checkpoints
                .associate_checkpoint_with_task_id(task_id, &canonical)
                .await
            {
                Ok(_) => final_id = canonical,
                Err(e) => error!(%task_id, %canonical, error = %e, "Failed to re-key checkpoint"),
            }
        }

        info!(task_id = %final_id, %execution_id, "Task completed");
        self.inner.events.emit(TaskEvent::Completed {
            task_id: final_id,
            execution_id: execution_id.to_string(),
        });
        self.teardown(window_id, execution_id).await;
    }

    async fn finish_failed(&self, task_id: &str, window_id: &str, execution_id: &str, err: EngineError) {
        warn!(%task_id, %execution_id, error = %err, "Task failed");
        self.save_context(task_id, window_id).await;

        let info = ErrorInfo::new(ErrorCode::ExecutionError, &err.message);
        if let Err(e) = self
            .inner
            .checkpoints
            .fail_checkpoint(task_id, info, err.failure_point.clone())
            .await
        {
            error!(%task_id, error = %e, "Failed to record task failure");
        }

        self.inner.events.emit(TaskEvent::Failed {
            task_id: task_id.to_string(),
            execution_id: execution_id.to_string(),
            message: err.message,
        });
        self.teardown(window_id, execution_id).await;
    }

    /// Copy the window's agent context into the task's checkpoint
    async fn save_context(&self, task_id: &str, window_id: &str) {
        let Some(context) = self.inner.contexts.export_context(window_id).await else {
            return;
        };
        let patch = CheckpointPatch::new().agent_context(context);
        if let Err(e) = self.inner.checkpoints.update_checkpoint(task_id, patch).await {
            warn!(%task_id, error = %e, "Failed to save agent context");
        }
    }

    /// Close the window if `execution_id` still owns it, then free its slot
    async fn teardown(&self, window_id: &str, execution_id: &str) -> bool {
        let closed = {
            let mut windows = self.inner.windows.lock().await;
            if windows.is_current(window_id, execution_id) {
                windows.close(window_id)
            } else {
                None
            }
        };
        let Some(window) = closed else {
            debug!(%window_id, %execution_id, "teardown: window already taken");
            return false;
        };

        window.cancel.cancel();
        self.inner.contexts.clear_window_context(window_id).await;
        self.release_slot(&window.task_id).await;
        true
    }

    /// Free a scheduler slot and launch whatever it promotes
    async fn release_slot(&self, task_id: &str) {
        let mut next = self.inner.scheduler.complete(task_id).await;
        while let Some(task) = next {
            next = self.start_promoted(task).await;
        }
    }

    /// Launch a promoted task; returns a further promotion when its slot had to be handed back
    async fn start_promoted(&self, task: QueuedTask) -> Option<QueuedTask> {
        debug!(task_id = %task.task_id, "TaskOrchestrator::start_promoted: called");
        let pending = self.inner.pending.lock().await.remove(&task.task_id);
        match pending {
            Some(pending) => {
                if let Err(e) = self.launch(pending).await {
                    error!(task_id = %task.task_id, error = %e, "Failed to launch promoted task");
                }
                None
            }
            None => {
                warn!(task_id = %task.task_id, "Promoted task has no pending request");
                self.inner.scheduler.complete(&task.task_id).await
            }
        }
    }

    /// Abort the window's run, save its progress and context, pause, tear down
    async fn stop_window(&self, window: &ExecutionWindow, reason: &str) -> Result<Option<Checkpoint>, OrchestratorError> {
        debug!(task_id = %window.task_id, %reason, "TaskOrchestrator::stop_window: called");
        window.cancel.cancel();

        let live = self.inner.engine.task_ids().await;
        let targets = std::iter::once(&window.task_id).chain(window.sub_task_ids.iter());
        for id in targets {
            if !live.contains(id) {
                debug!(task_id = %id, "stop_window: engine no longer tracks task");
                continue;
            }
            if let Err(e) = self.inner.engine.abort(id, reason).await {
                warn!(task_id = %id, error = %e, "Failed to abort task");
            }
        }

        if let Some(progress) = &window.progress
            && let Err(e) = progress.flush().await
        {
            warn!(task_id = %window.task_id, error = %e, "Failed to write progress before pause");
        }
        self.save_context(&window.task_id, &window.window_id).await;

        let paused = self.inner.checkpoints.pause_checkpoint(&window.task_id).await;
        self.teardown(&window.window_id, &window.execution_id).await;
        Ok(paused?)
    }

    /// Pause a running or queued task
    ///
    /// A queued task is only removed from the queue. A task with no live
    /// window but an in-progress checkpoint is paused on disk.
    pub async fn pause(&self, task_id: &str) -> Result<PauseOutcome, OrchestratorError> {
        debug!(%task_id, "TaskOrchestrator::pause: called");

        if self.inner.scheduler.cancel(task_id).await {
            let pending = self.inner.pending.lock().await.remove(task_id);
            info!(%task_id, "Removed queued task");
            // A fresh submission has no checkpoint yet; anything on disk is from an earlier run
            let checkpoint = match pending.and_then(|p| p.resumed) {
                Some(_) => self.inner.checkpoints.pause_checkpoint(task_id).await?,
                None => None,
            };
            self.inner.events.emit(TaskEvent::Paused {
                task_id: task_id.to_string(),
            });
            return Ok(PauseOutcome::Dequeued { checkpoint });
        }

        let window = self.inner.windows.lock().await.find_by_task(task_id).cloned();
        let checkpoint = match window {
            Some(window) => self.stop_window(&window, PAUSED_REASON).await?,
            None => {
                debug!(%task_id, "TaskOrchestrator::pause: no window, pausing checkpoint only");
                self.inner.checkpoints.pause_checkpoint(task_id).await?
            }
        };

        match checkpoint {
            Some(cp) => {
                info!(%task_id, "Task paused");
                self.inner.events.emit(TaskEvent::Paused {
                    task_id: task_id.to_string(),
                });
                Ok(PauseOutcome::Paused(cp))
            }
            None => Ok(PauseOutcome::NotFound),
        }
    }

    /// Resume a paused or failed task from its checkpoint
    pub async fn resume(&self, task_id: &str) -> Result<SubmitOutcome, OrchestratorError> {
        debug!(%task_id, "TaskOrchestrator::resume: called");
        if self.inner.windows.lock().await.find_by_task(task_id).is_some() {
            return Err(OrchestratorError::Rejected {
                task_id: task_id.to_string(),
                reason: "Already running".to_string(),
            });
        }

        let checkpoint = self.inner.checkpoints.resume_from_checkpoint(task_id).await?;
        info!(%task_id, retry_count = checkpoint.retry_count, "Resuming task");
        self.inner.events.emit(TaskEvent::Resumed {
            task_id: task_id.to_string(),
            retry_count: checkpoint.retry_count,
        });

        let request = TaskRequest::new(task_id, task_id, &checkpoint.workflow_xml)
            .steps(checkpoint.total_iterations as usize);
        let pending = PendingLaunch {
            request,
            resumed: Some(checkpoint),
        };

        match self.admit(pending).await {
            Err(e @ OrchestratorError::Rejected { .. }) => {
                // Leave the checkpoint resumable rather than stranded in progress
                if let Err(pause_err) = self.inner.checkpoints.pause_checkpoint(task_id).await {
                    warn!(%task_id, error = %pause_err, "Failed to re-pause rejected resume");
                }
                Err(e)
            }
            other => other,
        }
    }

    /// Close an execution window
    ///
    /// An in-progress task is only aborted when `confirmer` approves.
    pub async fn close_window(
        &self,
        window_id: &str,
        confirmer: &dyn CloseConfirmer,
    ) -> Result<CloseOutcome, OrchestratorError> {
        debug!(%window_id, "TaskOrchestrator::close_window: called");
        let window = self.inner.windows.lock().await.get(window_id).cloned();
        let Some(window) = window else {
            return Ok(CloseOutcome::NotFound);
        };

        let status = self.inner.checkpoints.get_checkpoint_status(&window.task_id).await?;
        if status.status != Some(CheckpointStatus::InProgress) {
            debug!(%window_id, ?status.status, "TaskOrchestrator::close_window: nothing in progress");
            self.teardown(&window.window_id, &window.execution_id).await;
            return Ok(CloseOutcome::Closed);
        }

        if !confirmer.confirm(window_id, &window.task_id).await {
            info!(%window_id, task_id = %window.task_id, "Window close declined");
            return Ok(CloseOutcome::Vetoed);
        }

        self.stop_window(&window, WINDOW_CLOSED_REASON).await?;
        warn!(task_id = %window.task_id, reason = WINDOW_CLOSED_REASON, "Task aborted");
        self.inner.events.emit(TaskEvent::Aborted {
            task_id: window.task_id.clone(),
            reason: WINDOW_CLOSED_REASON.to_string(),
        });
        Ok(CloseOutcome::Aborted { task_id: window.task_id })
    }

    /// Submit `request` later, once or on an interval
    ///
    /// A firing is skipped while the previous run of the same task is still
    /// queued or running.
    pub async fn schedule_task(&self, request: TaskRequest, spec: ScheduleSpec) -> Result<(), OrchestratorError> {
        debug!(task_id = %request.task_id, ?spec, "TaskOrchestrator::schedule_task: called");
        let key = request.task_id.clone();
        let this = self.clone();
        self.inner
            .timers
            .schedule(&key, spec, move || {
                let this = this.clone();
                let request = request.clone();
                async move { this.fire_scheduled(request).await }
            })
            .await?;
        Ok(())
    }

    async fn fire_scheduled(&self, request: TaskRequest) {
        let task_id = request.task_id.clone();
        let has_window = self.inner.windows.lock().await.find_by_task(&task_id).is_some();
        if has_window || self.inner.scheduler.is_queued(&task_id).await {
            info!(%task_id, "Scheduled run skipped; previous run still active");
            return;
        }
        if let Err(e) = self.submit(request).await {
            error!(%task_id, error = %e, "Scheduled submission failed");
        }
    }

    pub async fn cancel_scheduled(&self, task_id: &str) -> bool {
        self.inner.timers.cancel(task_id).await
    }

    pub async fn scheduled_tasks(&self) -> Vec<String> {
        self.inner.timers.armed().await
    }

    /// Change the concurrency cap; returns how many queued tasks were started
    pub async fn set_max_concurrent_tasks(&self, value: usize) -> Result<usize, OrchestratorError> {
        debug!(value, "TaskOrchestrator::set_max_concurrent_tasks: called");
        let promoted = self.inner.scheduler.set_max_concurrent(value).await?;
        let count = promoted.len();
        for task in promoted {
            let mut next = self.start_promoted(task).await;
            while let Some(task) = next {
                next = self.start_promoted(task).await;
            }
        }
        Ok(count)
    }

    pub async fn max_concurrent_tasks(&self) -> usize {
        self.inner.scheduler.max_concurrent().await
    }

    /// Record an engine sub-task so a window close aborts it too
    pub async fn register_sub_task(&self, window_id: &str, sub_task_id: &str) -> bool {
        self.inner.windows.lock().await.add_sub_task(window_id, sub_task_id)
    }

    pub async fn window_for_task(&self, task_id: &str) -> Option<ExecutionWindow> {
        self.inner.windows.lock().await.find_by_task(task_id).cloned()
    }

    pub async fn windows(&self) -> Vec<ExecutionWindow> {
        self.inner.windows.lock().await.windows()
    }

    pub async fn queue_state(&self) -> QueueState {
        self.inner.scheduler.queue_state().await
    }

    pub async fn queue_details(&self) -> Vec<QueueEntry> {
        self.inner.scheduler.queue_details().await
    }

    /// Run startup recovery over the checkpoint store
    pub async fn recover(&self) -> eyre::Result<RecoveryStats> {
        crate::checkpoint::recover(&self.inner.checkpoints).await
    }

    /// Disarm timers, stop the context sweep and pause every running task
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.inner.timers.cancel_all().await;
        self.inner.background.cancel();

        let running: Vec<String> = self.windows().await.into_iter().map(|w| w.task_id).collect();
        for task_id in running {
            if let Err(e) = self.pause(&task_id).await {
                warn!(%task_id, error = %e, "Failed to pause task during shutdown");
            }
        }
    }
}

/// Best-effort text of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
