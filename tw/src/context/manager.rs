//! AgentContextManager - per-window agent state
//!
//! Each execution window gets its own WindowContext; windows never see each
//! other's variables. State is shared behind a tokio Mutex so the handle can
//! be cloned into every task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ContextConfig;
use crate::domain::{AgentState, ContextTransfer, Variables, WindowContext, now_ms};

use super::compress::{CompressionStats, compress};

/// Errors from context import
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Malformed window context: {0}")]
    Malformed(#[from] serde_json::Error),
}

struct ContextInner {
    windows: HashMap<String, WindowContext>,
    /// contextId -> windowId
    by_context_id: HashMap<String, String>,
}

impl ContextInner {
    fn ensure(&mut self, window_id: &str) -> &mut WindowContext {
        let by_context_id = &mut self.by_context_id;
        let ctx = self.windows.entry(window_id.to_string()).or_insert_with(|| {
            debug!(%window_id, "ContextInner::ensure: creating context");
            let ctx = WindowContext::new(window_id);
            by_context_id.insert(ctx.context_id.clone(), window_id.to_string());
            ctx
        });
        ctx.touch();
        ctx
    }

    fn remove(&mut self, window_id: &str) -> Option<WindowContext> {
        let ctx = self.windows.remove(window_id)?;
        self.by_context_id.remove(&ctx.context_id);
        Some(ctx)
    }
}

/// Handle to the per-window agent contexts
#[derive(Clone)]
pub struct AgentContextManager {
    config: Arc<ContextConfig>,
    inner: Arc<Mutex<ContextInner>>,
}

impl AgentContextManager {
    pub fn new(config: ContextConfig) -> Self {
        debug!(?config, "AgentContextManager::new: called");
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(ContextInner {
                windows: HashMap::new(),
                by_context_id: HashMap::new(),
            })),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Create the window's context, or refresh the existing one
    pub async fn initialize_window_context(&self, window_id: &str) -> WindowContext {
        debug!(%window_id, "initialize_window_context: called");
        let mut inner = self.inner.lock().await;
        inner.ensure(window_id).clone()
    }

    /// Upsert an agent's state; returns compression stats if the context had to shrink
    ///
    /// `None` for `session_state` or `tool_results` keeps what the agent already had.
    pub async fn save_agent_state(
        &self,
        window_id: &str,
        agent_name: &str,
        variables: Variables,
        session_state: Option<Variables>,
        tool_results: Option<Vec<Value>>,
    ) -> Option<CompressionStats> {
        debug!(%window_id, %agent_name, "save_agent_state: called");
        let mut inner = self.inner.lock().await;
        let ctx = inner.ensure(window_id);

        let state = ctx
            .agent_states
            .entry(agent_name.to_string())
            .or_insert_with(|| AgentState::new(agent_name));
        state.variables = variables;
        if let Some(session_state) = session_state {
            state.session_state = session_state;
        }
        if let Some(tool_results) = tool_results {
            state.last_tool_results = tool_results;
        }
        state.timestamp = now_ms();

        let size = ctx.serialized_size();
        if size > self.config.max_size_bytes() {
            warn!(%window_id, size, limit = self.config.max_size_bytes(), "Window context over limit, compressing");
            let stats = compress(ctx, &self.config);
            info!(%window_id, ?stats, "Compressed window context");
            return Some(stats);
        }
        None
    }

    pub async fn get_agent_state(&self, window_id: &str, agent_name: &str) -> Option<AgentState> {
        debug!(%window_id, %agent_name, "get_agent_state: called");
        let inner = self.inner.lock().await;
        inner
            .windows
            .get(window_id)
            .and_then(|ctx| ctx.agent_states.get(agent_name))
            .cloned()
    }

    pub async fn get_all_agent_states(&self, window_id: &str) -> HashMap<String, AgentState> {
        debug!(%window_id, "get_all_agent_states: called");
        let inner = self.inner.lock().await;
        inner
            .windows
            .get(window_id)
            .map(|ctx| ctx.agent_states.clone())
            .unwrap_or_default()
    }

    /// Record a handoff from one agent to another
    ///
    /// `data` is merged into the target's variables only when the target
    /// already has state. Returns false when the window has no context.
    pub async fn transfer_context(
        &self,
        window_id: &str,
        from_agent: &str,
        to_agent: &str,
        data: Variables,
        reason: Option<String>,
    ) -> bool {
        debug!(%window_id, %from_agent, %to_agent, "transfer_context: called");
        let mut inner = self.inner.lock().await;
        let Some(ctx) = inner.windows.get_mut(window_id) else {
            debug!(%window_id, "transfer_context: no such window");
            return false;
        };

        let source_vars = ctx
            .agent_states
            .get(from_agent)
            .map(|s| s.variables.clone())
            .unwrap_or_default();

        if let Some(target) = ctx.agent_states.get_mut(to_agent) {
            debug!(%to_agent, keys = data.len(), "transfer_context: merging into target");
            for (key, value) in &data {
                target.variables.insert(key.clone(), value.clone());
            }
            target.timestamp = now_ms();
        }

        ctx.context_transfers.push(ContextTransfer {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            timestamp: now_ms(),
            context: data,
            variables: source_vars,
            reason,
        });
        ctx.touch();
        true
    }

    /// Set a window-scoped variable, creating the context if needed
    pub async fn set_global_variable(&self, window_id: &str, key: &str, value: Value) {
        debug!(%window_id, %key, "set_global_variable: called");
        let mut inner = self.inner.lock().await;
        inner.ensure(window_id).global_variables.insert(key.to_string(), value);
    }

    pub async fn get_global_variable(&self, window_id: &str, key: &str) -> Option<Value> {
        debug!(%window_id, %key, "get_global_variable: called");
        let inner = self.inner.lock().await;
        inner
            .windows
            .get(window_id)
            .and_then(|ctx| ctx.global_variables.get(key))
            .cloned()
    }

    /// Globals overlaid with the agent's own variables
    pub async fn get_agent_variables(&self, window_id: &str, agent_name: &str) -> Variables {
        debug!(%window_id, %agent_name, "get_agent_variables: called");
        let inner = self.inner.lock().await;
        let Some(ctx) = inner.windows.get(window_id) else {
            return Variables::new();
        };
        let mut merged = ctx.global_variables.clone();
        if let Some(state) = ctx.agent_states.get(agent_name) {
            for (key, value) in &state.variables {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Drop the window's context entirely; unknown ids are a no-op
    pub async fn clear_window_context(&self, window_id: &str) -> bool {
        debug!(%window_id, "clear_window_context: called");
        let mut inner = self.inner.lock().await;
        match inner.remove(window_id) {
            Some(mut ctx) => {
                ctx.is_active = false;
                ctx.agent_states.clear();
                ctx.context_transfers.clear();
                info!(%window_id, "Cleared window context");
                true
            }
            None => false,
        }
    }

    /// Mark the window's session ended; the next sweep purges it
    pub async fn deactivate_window_context(&self, window_id: &str) -> bool {
        debug!(%window_id, "deactivate_window_context: called");
        let mut inner = self.inner.lock().await;
        match inner.windows.get_mut(window_id) {
            Some(ctx) => {
                ctx.is_active = false;
                ctx.updated_at = now_ms();
                true
            }
            None => false,
        }
    }

    pub async fn compress_window_context(&self, window_id: &str) -> Option<CompressionStats> {
        debug!(%window_id, "compress_window_context: called");
        let mut inner = self.inner.lock().await;
        let ctx = inner.windows.get_mut(window_id)?;
        Some(compress(ctx, &self.config))
    }

    /// Remove contexts that are inactive or idle past the max age
    pub async fn cleanup_old_contexts(&self) -> usize {
        debug!("cleanup_old_contexts: called");
        let max_age_ms = i64::try_from(self.config.max_age().as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms().saturating_sub(max_age_ms);

        let mut inner = self.inner.lock().await;
        let stale: Vec<String> = inner
            .windows
            .values()
            .filter(|ctx| !ctx.is_active || ctx.updated_at < cutoff)
            .map(|ctx| ctx.window_id.clone())
            .collect();

        for window_id in &stale {
            debug!(%window_id, "cleanup_old_contexts: purging");
            inner.remove(window_id);
        }

        if !stale.is_empty() {
            info!(count = stale.len(), "Purged old window contexts");
        }
        stale.len()
    }

    /// Run `cleanup_old_contexts` on the configured interval until cancelled
    pub fn spawn_cleanup_task(&self, cancel: CancellationToken) -> JoinHandle<()> {
        debug!("spawn_cleanup_task: called");
        let manager = self.clone();
        let period = self.config.cleanup_interval().max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("spawn_cleanup_task: cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.cleanup_old_contexts().await;
                    }
                }
            }
        })
    }

    /// Find a window's context by its context id
    pub async fn find_by_context_id(&self, context_id: &str) -> Option<WindowContext> {
        debug!(%context_id, "find_by_context_id: called");
        let inner = self.inner.lock().await;
        let window_id = inner.by_context_id.get(context_id)?;
        inner.windows.get(window_id).cloned()
    }

    /// Serialize a window's full context
    pub async fn export_context(&self, window_id: &str) -> Option<Value> {
        debug!(%window_id, "export_context: called");
        let inner = self.inner.lock().await;
        let ctx = inner.windows.get(window_id)?;
        match serde_json::to_value(ctx) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%window_id, error = %e, "Failed to export window context");
                None
            }
        }
    }

    /// Replace `window_id`'s context with a previously exported one
    ///
    /// The imported context is rebound to `window_id` and marked active.
    pub async fn import_context(&self, window_id: &str, value: Value) -> Result<WindowContext, ContextError> {
        debug!(%window_id, "import_context: called");
        let mut ctx: WindowContext = serde_json::from_value(value)?;
        ctx.window_id = window_id.to_string();
        ctx.is_active = true;
        ctx.touch();

        let mut inner = self.inner.lock().await;
        inner.remove(window_id);
        if let Some(previous) = inner.by_context_id.get(&ctx.context_id).cloned() {
            // Same context imported into a second window; the latest import owns it
            debug!(%previous, "import_context: context id moved between windows");
            inner.remove(&previous);
        }
        inner
            .by_context_id
            .insert(ctx.context_id.clone(), window_id.to_string());
        inner.windows.insert(window_id.to_string(), ctx.clone());
        info!(%window_id, context_id = %ctx.context_id, "Imported window context");
        Ok(ctx)
    }

    pub async fn window_count(&self) -> usize {
        self.inner.lock().await.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn manager() -> AgentContextManager {
        AgentContextManager::new(ContextConfig::default())
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let mgr = manager();
        let first = mgr.initialize_window_context("w1").await;
        let second = mgr.initialize_window_context("w1").await;
        assert_eq!(first.context_id, second.context_id);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(mgr.window_count().await, 1);
    }

    #[tokio::test]
    async fn test_save_creates_window_on_demand() {
        let mgr = manager();
        mgr.save_agent_state("w1", "Browser", vars(&[("url", json!("a"))]), None, None)
            .await;

        let state = mgr.get_agent_state("w1", "Browser").await.unwrap();
        assert_eq!(state.variables["url"], json!("a"));
    }

    #[tokio::test]
    async fn test_save_keeps_existing_session_when_omitted() {
        let mgr = manager();
        mgr.save_agent_state("w1", "A", Variables::new(), Some(vars(&[("s", json!(1))])), Some(vec![json!(1)]))
            .await;
        mgr.save_agent_state("w1", "A", vars(&[("v", json!(2))]), None, None)
            .await;

        let state = mgr.get_agent_state("w1", "A").await.unwrap();
        assert_eq!(state.session_state["s"], json!(1));
        assert_eq!(state.last_tool_results, vec![json!(1)]);
        assert_eq!(state.variables["v"], json!(2));
    }

    #[tokio::test]
    async fn test_reads_on_unknown_window() {
        let mgr = manager();
        assert!(mgr.get_agent_state("nope", "A").await.is_none());
        assert!(mgr.get_all_agent_states("nope").await.is_empty());
        assert!(mgr.get_global_variable("nope", "k").await.is_none());
        assert!(mgr.get_agent_variables("nope", "A").await.is_empty());
        assert!(mgr.export_context("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_windows_are_isolated() {
        let mgr = manager();
        mgr.set_global_variable("w1", "k", json!("one")).await;
        mgr.set_global_variable("w2", "k", json!("two")).await;
        assert_eq!(mgr.get_global_variable("w1", "k").await, Some(json!("one")));
        assert_eq!(mgr.get_global_variable("w2", "k").await, Some(json!("two")));
    }

    #[tokio::test]
    async fn test_transfer_merges_only_into_existing_target() {
        let mgr = manager();
        mgr.save_agent_state("w1", "Planner", vars(&[("plan", json!("p"))]), None, None)
            .await;

        // Target has no state yet: logged, not created
        let ok = mgr
            .transfer_context("w1", "Planner", "Browser", vars(&[("goal", json!("g"))]), None)
            .await;
        assert!(ok);
        assert!(mgr.get_agent_state("w1", "Browser").await.is_none());

        mgr.save_agent_state("w1", "Browser", vars(&[("tab", json!(1))]), None, None)
            .await;
        mgr.transfer_context("w1", "Planner", "Browser", vars(&[("goal", json!("g"))]), Some("handoff".into()))
            .await;

        let browser = mgr.get_agent_state("w1", "Browser").await.unwrap();
        assert_eq!(browser.variables["goal"], json!("g"));
        assert_eq!(browser.variables["tab"], json!(1));

        let exported = mgr.export_context("w1").await.unwrap();
        let transfers = exported["contextTransfers"].as_array().unwrap();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[1]["variables"]["plan"], json!("p"));
        assert_eq!(transfers[1]["reason"], json!("handoff"));
    }

    #[tokio::test]
    async fn test_transfer_unknown_window() {
        let mgr = manager();
        assert!(!mgr.transfer_context("nope", "A", "B", Variables::new(), None).await);
    }

    #[tokio::test]
    async fn test_agent_variables_override_globals() {
        let mgr = manager();
        mgr.set_global_variable("w1", "lang", json!("en")).await;
        mgr.set_global_variable("w1", "site", json!("x")).await;
        mgr.save_agent_state("w1", "A", vars(&[("lang", json!("fr"))]), None, None)
            .await;

        let merged = mgr.get_agent_variables("w1", "A").await;
        assert_eq!(merged["lang"], json!("fr"));
        assert_eq!(merged["site"], json!("x"));
    }

    #[tokio::test]
    async fn test_clear_window_context() {
        let mgr = manager();
        let ctx = mgr.initialize_window_context("w1").await;
        assert!(mgr.clear_window_context("w1").await);
        assert!(mgr.find_by_context_id(&ctx.context_id).await.is_none());
        assert_eq!(mgr.window_count().await, 0);

        // Unknown id is a no-op
        assert!(!mgr.clear_window_context("w1").await);
    }

    #[tokio::test]
    async fn test_compression_keeps_last_three_tool_results() {
        let mgr = manager();
        let results: Vec<Value> = (0..6).map(|i| json!(i)).collect();
        mgr.save_agent_state("w1", "A", Variables::new(), None, Some(results))
            .await;

        let stats = mgr.compress_window_context("w1").await.unwrap();
        assert_eq!(stats.tool_results_dropped, 3);
        let state = mgr.get_agent_state("w1", "A").await.unwrap();
        assert_eq!(state.last_tool_results, vec![json!(3), json!(4), json!(5)]);
    }

    #[tokio::test]
    async fn test_save_compresses_over_limit() {
        let config = ContextConfig {
            max_size_mb: 0,
            ..Default::default()
        };
        let mgr = AgentContextManager::new(config);
        let results: Vec<Value> = (0..5).map(|i| json!(i)).collect();

        let stats = mgr
            .save_agent_state("w1", "A", Variables::new(), None, Some(results))
            .await
            .unwrap();
        assert_eq!(stats.tool_results_dropped, 2);
        assert_eq!(mgr.get_agent_state("w1", "A").await.unwrap().last_tool_results.len(), 3);
    }

    #[tokio::test]
    async fn test_cleanup_purges_inactive_and_idle() {
        let mgr = manager();
        mgr.initialize_window_context("active").await;
        mgr.initialize_window_context("ended").await;
        mgr.initialize_window_context("idle").await;
        mgr.deactivate_window_context("ended").await;
        {
            let mut inner = mgr.inner.lock().await;
            let idle = inner.windows.get_mut("idle").unwrap();
            idle.updated_at = now_ms() - 25 * 3600 * 1000;
        }

        assert_eq!(mgr.cleanup_old_contexts().await, 2);
        assert_eq!(mgr.window_count().await, 1);
        assert!(mgr.get_all_agent_states("active").await.is_empty());
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let mgr = manager();
        mgr.set_global_variable("w1", "k", json!("v")).await;
        mgr.save_agent_state("w1", "A", vars(&[("x", json!(1))]), None, None)
            .await;
        let exported = mgr.export_context("w1").await.unwrap();
        mgr.clear_window_context("w1").await;

        let fresh = manager();
        let imported = fresh.import_context("w9", exported).await.unwrap();
        assert_eq!(imported.window_id, "w9");
        assert!(imported.is_active);
        assert_eq!(fresh.get_global_variable("w9", "k").await, Some(json!("v")));
        assert_eq!(fresh.get_agent_variables("w9", "A").await["x"], json!(1));
        assert!(fresh.find_by_context_id(&imported.context_id).await.is_some());
    }

    #[tokio::test]
    async fn test_import_rejects_garbage() {
        let mgr = manager();
        let err = mgr.import_context("w1", json!({"nope": true})).await;
        assert!(matches!(err, Err(ContextError::Malformed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_stops_on_cancel() {
        let config = ContextConfig {
            cleanup_interval_secs: 60,
            ..Default::default()
        };
        let mgr = AgentContextManager::new(config);
        mgr.initialize_window_context("w1").await;
        mgr.deactivate_window_context("w1").await;

        let cancel = CancellationToken::new();
        let handle = mgr.spawn_cleanup_task(cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(mgr.window_count().await, 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
