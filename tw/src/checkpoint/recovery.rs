//! Crash recovery
//!
//! Detects checkpoints left `in_progress` by an interrupted process and parks
//! them as `paused` so they can be resumed instead of restarted.

use tracing::{debug, info, warn};

use crate::domain::CheckpointStatus;

use super::CheckpointManager;

/// Recovery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    /// Checkpoints still marked in_progress (interrupted runs)
    pub interrupted: usize,
    /// Paused checkpoints awaiting resume
    pub paused: usize,
    /// Failed checkpoints awaiting retry
    pub failed: usize,
    /// Interrupted checkpoints moved to paused by `recover`
    pub marked_paused: usize,
}

impl RecoveryStats {
    pub fn has_work(&self) -> bool {
        self.interrupted > 0 || self.paused > 0 || self.failed > 0
    }
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "interrupted: {}, paused: {}, failed: {}",
            self.interrupted, self.paused, self.failed
        )
    }
}

/// Count checkpoints that can be picked up again
pub async fn scan_for_recovery(checkpoints: &CheckpointManager) -> eyre::Result<RecoveryStats> {
    let mut stats = RecoveryStats::default();

    let all = checkpoints
        .list_checkpoints()
        .await
        .map_err(|e| eyre::eyre!("Failed to list checkpoints: {}", e))?;

    for cp in &all {
        match cp.status {
            CheckpointStatus::InProgress => {
                debug!(task_id = %cp.task_id, node = cp.current_node_index, "Found interrupted checkpoint");
                stats.interrupted += 1;
            }
            CheckpointStatus::Paused => stats.paused += 1,
            CheckpointStatus::Failed => stats.failed += 1,
            CheckpointStatus::Completed => {}
        }
    }

    if stats.has_work() {
        info!("Recovery scan found incomplete work: {}", stats);
    } else {
        debug!("Recovery scan found no incomplete work");
    }

    Ok(stats)
}

/// Mark interrupted checkpoints as paused
pub async fn mark_interrupted_as_paused(checkpoints: &CheckpointManager) -> eyre::Result<usize> {
    let all = checkpoints
        .list_checkpoints()
        .await
        .map_err(|e| eyre::eyre!("Failed to list checkpoints: {}", e))?;

    let mut count = 0;
    for cp in all.into_iter().filter(|cp| cp.status == CheckpointStatus::InProgress) {
        warn!(
            task_id = %cp.task_id,
            node = cp.current_node_index,
            iteration = cp.iteration,
            "Marking interrupted checkpoint as paused"
        );
        checkpoints
            .pause_checkpoint(&cp.task_id)
            .await
            .map_err(|e| eyre::eyre!("Failed to pause checkpoint {}: {}", cp.task_id, e))?;
        count += 1;
    }

    if count > 0 {
        info!("Marked {} interrupted checkpoints as paused", count);
    }

    Ok(count)
}

/// Full recovery process: scan, then park interrupted checkpoints
pub async fn recover(checkpoints: &CheckpointManager) -> eyre::Result<RecoveryStats> {
    info!("Starting crash recovery process");

    let mut stats = scan_for_recovery(checkpoints).await?;
    if stats.interrupted > 0 {
        stats.marked_paused = mark_interrupted_as_paused(checkpoints).await?;
    }

    info!("Crash recovery complete: {}", stats);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointConfig;
    use crate::domain::NewCheckpoint;
    use crate::error::{ErrorCode, ErrorInfo};
    use serde_json::Value;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_recovery_empty_store() {
        let temp = tempdir().unwrap();
        let manager = CheckpointManager::spawn(temp.path(), &CheckpointConfig::default()).unwrap();

        let stats = scan_for_recovery(&manager).await.unwrap();
        assert_eq!(stats, RecoveryStats::default());
        assert!(!stats.has_work());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_scan_counts_by_status() {
        let temp = tempdir().unwrap();
        let manager = CheckpointManager::spawn(temp.path(), &CheckpointConfig::default()).unwrap();

        for id in ["run-1", "run-2", "paused", "failed", "done"] {
            manager.create_checkpoint(NewCheckpoint::new(id, "")).await.unwrap();
        }
        manager.pause_checkpoint("paused").await.unwrap();
        manager
            .fail_checkpoint("failed", ErrorInfo::new(ErrorCode::ExecutionError, "x"), None)
            .await
            .unwrap();
        manager.complete_checkpoint("done", Value::Null).await.unwrap();

        let stats = scan_for_recovery(&manager).await.unwrap();
        assert_eq!(stats.interrupted, 2);
        assert_eq!(stats.paused, 1);
        assert_eq!(stats.failed, 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_recover_marks_interrupted_as_paused() {
        let temp = tempdir().unwrap();
        let manager = CheckpointManager::spawn(temp.path(), &CheckpointConfig::default()).unwrap();

        manager
            .create_checkpoint(NewCheckpoint::new("crashed", "").node_index(3).meta(3, 8))
            .await
            .unwrap();

        let stats = recover(&manager).await.unwrap();
        assert_eq!(stats.interrupted, 1);
        assert_eq!(stats.marked_paused, 1);

        let cp = manager.load_checkpoint("crashed").await.unwrap().unwrap();
        assert_eq!(cp.status, CheckpointStatus::Paused);
        assert_eq!(cp.current_node_index, 3);

        // Second pass has nothing left to park
        let again = recover(&manager).await.unwrap();
        assert_eq!(again.interrupted, 0);
        assert_eq!(again.paused, 1);

        manager.shutdown().await;
    }
}
