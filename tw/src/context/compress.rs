//! Window context compression
//!
//! Bounds the size of a long-lived context by dropping old handoffs, old tool
//! results and oversized variables.

use serde::Serialize;
use tracing::debug;

use crate::config::ContextConfig;
use crate::domain::{Variables, WindowContext, now_ms};

/// What a compression pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub transfers_dropped: usize,
    pub tool_results_dropped: usize,
    pub variables_dropped: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

impl CompressionStats {
    pub fn removed_anything(&self) -> bool {
        self.transfers_dropped + self.tool_results_dropped + self.variables_dropped > 0
    }
}

/// Compress `ctx` in place
pub fn compress(ctx: &mut WindowContext, config: &ContextConfig) -> CompressionStats {
    debug!(window_id = %ctx.window_id, "compress: called");
    let mut stats = CompressionStats {
        bytes_before: ctx.serialized_size(),
        ..Default::default()
    };

    let retention_ms = i64::try_from(config.transfer_retention().as_millis()).unwrap_or(i64::MAX);
    let cutoff = now_ms().saturating_sub(retention_ms);
    let before = ctx.context_transfers.len();
    ctx.context_transfers.retain(|t| t.timestamp >= cutoff);
    stats.transfers_dropped = before - ctx.context_transfers.len();

    for state in ctx.agent_states.values_mut() {
        let len = state.last_tool_results.len();
        if len > config.tool_result_keep {
            let excess = len - config.tool_result_keep;
            state.last_tool_results.drain(..excess);
            stats.tool_results_dropped += excess;
        }
        stats.variables_dropped += drop_oversized(&mut state.variables, config.max_variable_bytes);
    }
    stats.variables_dropped += drop_oversized(&mut ctx.global_variables, config.max_variable_bytes);

    stats.bytes_after = ctx.serialized_size();
    debug!(window_id = %ctx.window_id, ?stats, "compress: done");
    stats
}

fn drop_oversized(vars: &mut Variables, max_bytes: usize) -> usize {
    let before = vars.len();
    vars.retain(|key, value| {
        let size = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
        if size > max_bytes {
            debug!(%key, size, "drop_oversized: dropping variable");
            false
        } else {
            true
        }
    });
    before - vars.len()
}
