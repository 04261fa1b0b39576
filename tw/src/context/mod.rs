//! Agent context management
//!
//! Per-window variables, agent state and handoff history, with size-bounded
//! compression and an idle sweep.

mod compress;
mod manager;

pub use compress::{CompressionStats, compress};
pub use manager::{AgentContextManager, ContextError};
