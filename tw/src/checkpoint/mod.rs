//! Checkpoint management with actor pattern
//!
//! CheckpointManager owns the checkpoint store and processes messages via
//! channels, making it the single writer for every task's checkpoint.

mod manager;
mod messages;
mod recovery;

pub use manager::CheckpointManager;
pub use messages::{CheckpointCommand, CheckpointError, CheckpointResponse};
pub use recovery::{RecoveryStats, mark_interrupted_as_paused, recover, scan_for_recovery};
