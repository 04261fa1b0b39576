//! Agent context domain types
//!
//! A WindowContext holds everything the agents of one execution window share:
//! global variables, per-agent state and the log of agent handoffs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use checkpointstore::now_ms;

/// Variable map shared with agents
pub type Variables = Map<String, Value>;

/// State kept for one named agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub agent_name: String,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub session_state: Variables,
    #[serde(default)]
    pub last_tool_results: Vec<Value>,
    pub timestamp: i64,
}

impl AgentState {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            variables: Variables::new(),
            session_state: Variables::new(),
            last_tool_results: Vec::new(),
            timestamp: now_ms(),
        }
    }
}

/// One agent-to-agent handoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextTransfer {
    pub from_agent: String,
    pub to_agent: String,
    pub timestamp: i64,
    /// Data handed to the target agent
    #[serde(default)]
    pub context: Variables,
    /// Source agent's variables at handoff time
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Agent context for one execution window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowContext {
    pub window_id: String,
    pub context_id: String,
    #[serde(default)]
    pub global_variables: Variables,
    #[serde(default)]
    pub agent_states: HashMap<String, AgentState>,
    #[serde(default)]
    pub context_transfers: Vec<ContextTransfer>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WindowContext {
    /// Create an active, empty context with a generated context ID
    pub fn new(window_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            window_id: window_id.into(),
            context_id: uuid::Uuid::now_v7().to_string(),
            global_variables: Variables::new(),
            agent_states: HashMap::new(),
            context_transfers: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the idle timer
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    /// Serialized size in bytes (0 if serialization fails)
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
