//! CheckpointManager - actor that owns the checkpoint store
//!
//! Every read-modify-write for every task id goes through one actor task, so a
//! checkpoint never has two concurrent writers. The actor keeps a lazily
//! filled cache that is written through to disk on every mutation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use checkpointstore::JsonStore;

use crate::config::CheckpointConfig;
use crate::domain::{
    COMPLETION_TOOL_NAME, Checkpoint, CheckpointPatch, CheckpointStatusView, FailureInfo, NewCheckpoint,
    RecoverySummary, ToolResultEntry, Transition, now_ms,
};
use crate::error::ErrorInfo;

use super::messages::{CheckpointCommand, CheckpointError, CheckpointResponse};

/// Handle to send commands to the CheckpointManager
#[derive(Clone)]
pub struct CheckpointManager {
    tx: mpsc::Sender<CheckpointCommand>,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager").finish_non_exhaustive()
    }
}

impl CheckpointManager {
    /// Spawn a new CheckpointManager actor rooted at `store_dir`
    pub fn spawn(store_dir: impl AsRef<Path>, config: &CheckpointConfig) -> CheckpointResponse<Self> {
        debug!(store_dir = %store_dir.as_ref().display(), "spawn: called");
        let store = JsonStore::open(store_dir.as_ref())?;

        let (tx, rx) = mpsc::channel(256);

        let actor = Actor {
            store,
            cache: HashMap::new(),
            tokens_per_node: config.tokens_per_node,
        };
        tokio::spawn(actor_loop(actor, rx));

        info!("CheckpointManager spawned");

        Ok(Self { tx })
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> CheckpointCommand) -> CheckpointResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| CheckpointError::ChannelError)?;
        reply_rx.await.map_err(|_| CheckpointError::ChannelError)
    }

    /// Create (or overwrite) the checkpoint for a task
    ///
    /// The record is on disk before this returns; write failures propagate.
    pub async fn create_checkpoint(&self, init: NewCheckpoint) -> CheckpointResponse<Checkpoint> {
        debug!(task_id = %init.task_id, node_index = init.current_node_index, "create_checkpoint: called");
        let checkpoint = Box::new(init.build());
        self.request(|reply| CheckpointCommand::Create { checkpoint, reply })
            .await?
    }

    /// Merge a partial update; `None` when the task has no checkpoint
    pub async fn update_checkpoint(
        &self,
        task_id: &str,
        patch: CheckpointPatch,
    ) -> CheckpointResponse<Option<Checkpoint>> {
        debug!(%task_id, "update_checkpoint: called");
        self.request(|reply| CheckpointCommand::Update {
            task_id: task_id.to_string(),
            patch: Box::new(patch),
            reply,
        })
        .await?
    }

    /// Mark a checkpoint paused
    pub async fn pause_checkpoint(&self, task_id: &str) -> CheckpointResponse<Option<Checkpoint>> {
        debug!(%task_id, "pause_checkpoint: called");
        self.request(|reply| CheckpointCommand::Pause {
            task_id: task_id.to_string(),
            reply,
        })
        .await?
    }

    /// Mark a checkpoint failed, recording the error and bumping the retry count
    pub async fn fail_checkpoint(
        &self,
        task_id: &str,
        error: ErrorInfo,
        failure_point: Option<String>,
    ) -> CheckpointResponse<Option<Checkpoint>> {
        debug!(%task_id, code = %error.code, ?failure_point, "fail_checkpoint: called");
        self.request(|reply| CheckpointCommand::Fail {
            task_id: task_id.to_string(),
            error,
            failure_point,
            reply,
        })
        .await?
    }

    /// Mark a checkpoint completed and append the final result
    pub async fn complete_checkpoint(&self, task_id: &str, result: Value) -> CheckpointResponse<Option<Checkpoint>> {
        debug!(%task_id, "complete_checkpoint: called");
        self.request(|reply| CheckpointCommand::Complete {
            task_id: task_id.to_string(),
            result,
            reply,
        })
        .await?
    }

    /// Move a paused or failed checkpoint back to in-progress
    pub async fn resume_from_checkpoint(&self, task_id: &str) -> CheckpointResponse<Checkpoint> {
        debug!(%task_id, "resume_from_checkpoint: called");
        self.request(|reply| CheckpointCommand::Resume {
            task_id: task_id.to_string(),
            reply,
        })
        .await?
    }

    /// Remove a checkpoint; unknown ids are a silent success
    pub async fn delete_checkpoint(&self, task_id: &str) -> CheckpointResponse<bool> {
        debug!(%task_id, "delete_checkpoint: called");
        self.request(|reply| CheckpointCommand::Delete {
            task_id: task_id.to_string(),
            reply,
        })
        .await?
    }

    pub async fn load_checkpoint(&self, task_id: &str) -> CheckpointResponse<Option<Checkpoint>> {
        debug!(%task_id, "load_checkpoint: called");
        self.request(|reply| CheckpointCommand::Load {
            task_id: task_id.to_string(),
            reply,
        })
        .await?
    }

    pub async fn get_checkpoint_status(&self, task_id: &str) -> CheckpointResponse<CheckpointStatusView> {
        debug!(%task_id, "get_checkpoint_status: called");
        self.request(|reply| CheckpointCommand::Status {
            task_id: task_id.to_string(),
            reply,
        })
        .await?
    }

    pub async fn get_recovery_summary(&self, task_id: &str) -> CheckpointResponse<Option<RecoverySummary>> {
        debug!(%task_id, "get_recovery_summary: called");
        self.request(|reply| CheckpointCommand::Summary {
            task_id: task_id.to_string(),
            reply,
        })
        .await?
    }

    /// All checkpoints, newest first; storage failures yield an empty list
    pub async fn list_checkpoints(&self) -> CheckpointResponse<Vec<Checkpoint>> {
        debug!("list_checkpoints: called");
        self.request(|reply| CheckpointCommand::List { reply }).await
    }

    /// Sweep completed checkpoints older than `max_age`; returns how many were removed
    pub async fn cleanup_old_checkpoints(&self, max_age: Duration) -> CheckpointResponse<usize> {
        debug!(?max_age, "cleanup_old_checkpoints: called");
        self.request(|reply| CheckpointCommand::Cleanup { max_age, reply })
            .await?
    }

    /// Re-key a checkpoint from `old_task_id` to `new_task_id`
    ///
    /// Safe to retry after an interrupted rename.
    pub async fn associate_checkpoint_with_task_id(
        &self,
        old_task_id: &str,
        new_task_id: &str,
    ) -> CheckpointResponse<Option<Checkpoint>> {
        debug!(%old_task_id, %new_task_id, "associate_checkpoint_with_task_id: called");
        self.request(|reply| CheckpointCommand::Associate {
            old_task_id: old_task_id.to_string(),
            new_task_id: new_task_id.to_string(),
            reply,
        })
        .await?
    }

    /// Drop the in-memory copy; the next access reloads from disk
    pub async fn evict_cached(&self, task_id: &str) -> CheckpointResponse<bool> {
        debug!(%task_id, "evict_cached: called");
        self.request(|reply| CheckpointCommand::Evict {
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    /// Stop the actor; later calls fail with ChannelError
    pub async fn shutdown(&self) {
        debug!("shutdown: called");
        let _ = self.tx.send(CheckpointCommand::Shutdown).await;
    }
}

struct Actor {
    store: JsonStore<Checkpoint>,
    cache: HashMap<String, Checkpoint>,
    tokens_per_node: u64,
}

impl Actor {
    /// Cache first, then disk
    async fn fetch(&mut self, task_id: &str) -> CheckpointResponse<Option<Checkpoint>> {
        if let Some(cp) = self.cache.get(task_id) {
            debug!(%task_id, "Actor::fetch: cache hit");
            return Ok(Some(cp.clone()));
        }
        match self.store.read(task_id).await? {
            Some(cp) => {
                debug!(%task_id, "Actor::fetch: loaded from disk");
                self.cache.insert(task_id.to_string(), cp.clone());
                Ok(Some(cp))
            }
            None => {
                debug!(%task_id, "Actor::fetch: not found");
                Ok(None)
            }
        }
    }

    /// Write through; the cache only changes once the disk write succeeded
    async fn persist(&mut self, cp: Checkpoint) -> CheckpointResponse<Checkpoint> {
        if let Err(e) = self.store.write(&cp).await {
            warn!(
                task_id = %cp.task_id,
                category = e.category(),
                severity = %e.severity(),
                error = %e,
                "Failed to persist checkpoint"
            );
            return Err(e.into());
        }
        self.cache.insert(cp.task_id.clone(), cp.clone());
        Ok(cp)
    }

    /// Load, apply `transition`, run `edit`, persist
    async fn mutate(
        &mut self,
        task_id: &str,
        transition: Transition,
        edit: impl FnOnce(&mut Checkpoint) -> CheckpointResponse<()>,
    ) -> CheckpointResponse<Option<Checkpoint>> {
        let Some(mut cp) = self.fetch(task_id).await? else {
            debug!(%task_id, %transition, "Actor::mutate: no checkpoint");
            return Ok(None);
        };
        cp.transition(transition)
            .map_err(|from| CheckpointError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                action: transition,
            })?;
        edit(&mut cp)?;
        self.persist(cp).await.map(Some)
    }

    async fn create(&mut self, cp: Checkpoint) -> CheckpointResponse<Checkpoint> {
        if self.cache.contains_key(&cp.task_id) || self.store.exists(&cp.task_id).await {
            info!(task_id = %cp.task_id, "Overwriting existing checkpoint");
        }
        let cp = self.persist(cp).await?;
        info!(task_id = %cp.task_id, checkpoint_id = %cp.id, "Created checkpoint");
        Ok(cp)
    }

    async fn update(&mut self, task_id: &str, patch: CheckpointPatch) -> CheckpointResponse<Option<Checkpoint>> {
        self.mutate(task_id, Transition::Update, |cp| {
            let requested = patch.current_node_index;
            cp.apply_patch(patch)
                .map_err(|current| CheckpointError::NodeIndexRegression {
                    task_id: cp.task_id.clone(),
                    current,
                    requested: requested.unwrap_or_default(),
                })
        })
        .await
    }

    async fn fail(
        &mut self,
        task_id: &str,
        error: ErrorInfo,
        failure_point: Option<String>,
    ) -> CheckpointResponse<Option<Checkpoint>> {
        let result = self
            .mutate(task_id, Transition::Fail, |cp| {
                cp.error = Some(FailureInfo {
                    message: error.message,
                    code: error.code.as_str().to_string(),
                    timestamp: now_ms(),
                });
                cp.failure_point = failure_point;
                cp.record_retry();
                Ok(())
            })
            .await?;
        if let Some(cp) = &result {
            warn!(%task_id, retry_count = cp.retry_count, "Checkpoint marked failed");
        }
        Ok(result)
    }

    async fn complete(&mut self, task_id: &str, result: Value) -> CheckpointResponse<Option<Checkpoint>> {
        let done = self
            .mutate(task_id, Transition::Complete, |cp| {
                cp.tool_results
                    .push(ToolResultEntry::new(COMPLETION_TOOL_NAME, Value::Null, result));
                Ok(())
            })
            .await?;
        if done.is_some() {
            info!(%task_id, "Checkpoint completed");
        }
        Ok(done)
    }

    async fn resume(&mut self, task_id: &str) -> CheckpointResponse<Checkpoint> {
        let resumed = self
            .mutate(task_id, Transition::Resume, |cp| {
                cp.record_retry();
                cp.error = None;
                cp.failure_point = None;
                Ok(())
            })
            .await?
            .ok_or_else(|| CheckpointError::NotFound(task_id.to_string()))?;
        info!(%task_id, retry_count = resumed.retry_count, "Resumed checkpoint");
        Ok(resumed)
    }

    async fn delete(&mut self, task_id: &str) -> CheckpointResponse<bool> {
        let cached = self.cache.remove(task_id).is_some();
        let removed = self.store.delete(task_id).await?;
        Ok(cached || removed)
    }

    async fn list(&mut self) -> Vec<Checkpoint> {
        match self.store.list().await {
            Ok(mut checkpoints) => {
                checkpoints.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                checkpoints
            }
            Err(e) => {
                warn!(
                    category = e.category(),
                    severity = %e.severity(),
                    error = %e,
                    "Failed to list checkpoints"
                );
                Vec::new()
            }
        }
    }

    async fn cleanup(&mut self, max_age: Duration) -> CheckpointResponse<usize> {
        let removed = self.store.sweep(max_age).await?;
        for task_id in &removed {
            self.cache.remove(task_id);
        }
        info!(count = removed.len(), "Cleaned up old checkpoints");
        Ok(removed.len())
    }

    async fn associate(&mut self, old_task_id: &str, new_task_id: &str) -> CheckpointResponse<Option<Checkpoint>> {
        if old_task_id == new_task_id {
            return self.fetch(old_task_id).await;
        }

        let old = self.fetch(old_task_id).await?;
        let new = self.fetch(new_task_id).await?;

        match (old, new) {
            (None, None) => {
                debug!(%old_task_id, "Actor::associate: nothing to re-key");
                Ok(None)
            }
            (None, Some(existing)) => {
                debug!(%new_task_id, "Actor::associate: already re-keyed");
                Ok(Some(existing))
            }
            (Some(old), Some(existing)) if old.id == existing.id => {
                // Interrupted rename: new file landed, old one was never removed
                debug!(%old_task_id, %new_task_id, "Actor::associate: removing stale old key");
                self.delete(old_task_id).await?;
                Ok(Some(existing))
            }
            (Some(mut cp), existing) => {
                if existing.is_some() {
                    warn!(%new_task_id, "Re-key replaces an unrelated checkpoint");
                }
                cp.task_id = new_task_id.to_string();
                cp.touch();
                let cp = self.persist(cp).await?;
                self.delete(old_task_id).await?;
                info!(%old_task_id, %new_task_id, "Re-keyed checkpoint");
                Ok(Some(cp))
            }
        }
    }
}

/// The actor loop that processes commands
async fn actor_loop(mut actor: Actor, mut rx: mpsc::Receiver<CheckpointCommand>) {
    debug!("actor_loop: called");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            CheckpointCommand::Create { checkpoint, reply } => {
                debug!(task_id = %checkpoint.task_id, "actor_loop: Create command");
                let _ = reply.send(actor.create(*checkpoint).await);
            }

            CheckpointCommand::Update { task_id, patch, reply } => {
                debug!(%task_id, "actor_loop: Update command");
                let _ = reply.send(actor.update(&task_id, *patch).await);
            }

            CheckpointCommand::Pause { task_id, reply } => {
                debug!(%task_id, "actor_loop: Pause command");
                let result = actor.mutate(&task_id, Transition::Pause, |_| Ok(())).await;
                let _ = reply.send(result);
            }

            CheckpointCommand::Fail {
                task_id,
                error,
                failure_point,
                reply,
            } => {
                debug!(%task_id, "actor_loop: Fail command");
                let _ = reply.send(actor.fail(&task_id, error, failure_point).await);
            }

            CheckpointCommand::Complete { task_id, result, reply } => {
                debug!(%task_id, "actor_loop: Complete command");
                let _ = reply.send(actor.complete(&task_id, result).await);
            }

            CheckpointCommand::Resume { task_id, reply } => {
                debug!(%task_id, "actor_loop: Resume command");
                let _ = reply.send(actor.resume(&task_id).await);
            }

            CheckpointCommand::Delete { task_id, reply } => {
                debug!(%task_id, "actor_loop: Delete command");
                let _ = reply.send(actor.delete(&task_id).await);
            }

            CheckpointCommand::Load { task_id, reply } => {
                debug!(%task_id, "actor_loop: Load command");
                let _ = reply.send(actor.fetch(&task_id).await);
            }

            CheckpointCommand::Status { task_id, reply } => {
                debug!(%task_id, "actor_loop: Status command");
                let result = actor.fetch(&task_id).await.map(|cp| {
                    cp.map(|cp| cp.status_view())
                        .unwrap_or_else(CheckpointStatusView::missing)
                });
                let _ = reply.send(result);
            }

            CheckpointCommand::Summary { task_id, reply } => {
                debug!(%task_id, "actor_loop: Summary command");
                let tokens_per_node = actor.tokens_per_node;
                let result = actor
                    .fetch(&task_id)
                    .await
                    .map(|cp| cp.map(|cp| cp.recovery_summary(tokens_per_node)));
                let _ = reply.send(result);
            }

            CheckpointCommand::List { reply } => {
                debug!("actor_loop: List command");
                let _ = reply.send(actor.list().await);
            }

            CheckpointCommand::Cleanup { max_age, reply } => {
                debug!(?max_age, "actor_loop: Cleanup command");
                let _ = reply.send(actor.cleanup(max_age).await);
            }

            CheckpointCommand::Associate {
                old_task_id,
                new_task_id,
                reply,
            } => {
                debug!(%old_task_id, %new_task_id, "actor_loop: Associate command");
                let _ = reply.send(actor.associate(&old_task_id, &new_task_id).await);
            }

            CheckpointCommand::Evict { task_id, reply } => {
                debug!(%task_id, "actor_loop: Evict command");
                let _ = reply.send(actor.cache.remove(&task_id).is_some());
            }

            CheckpointCommand::Shutdown => {
                info!("CheckpointManager shutting down");
                break;
            }
        }
    }

    debug!("CheckpointManager actor stopped");
}
