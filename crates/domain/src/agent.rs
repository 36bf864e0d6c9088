//! Agent and team data model (spec §3).

use crate::message::{Message, ToolCall};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An agent's lifecycle state. See spec §4.13 for the transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Planning,
    Processing,
    ExecutingTool,
    AwaitingToolResult,
    Error,
}

/// Static + mutable configuration of an agent (provider/model/persona may
/// change across a cycle's lifetime via model failover or user override).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub persona: String,
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub extras: std::collections::BTreeMap<String, String>,
}

/// A live agent: configuration, conversation history, and per-cycle scratch
/// state. Histories are mutated only by the cycle handler and interaction
/// handler, never concurrently for the same agent (spec §3 "Ownership").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub config: AgentConfig,
    pub state: AgentState,
    pub history: Vec<Message>,
    /// Set only while `state == Planning`; holds the verbatim `<plan>` body
    /// once emitted.
    #[serde(default)]
    pub current_plan: Option<String>,
    /// Tool calls from the current turn awaiting execution/result.
    #[serde(default)]
    pub pending_tool_calls: Vec<ToolCall>,
    pub sandbox_path: PathBuf,
    /// Consecutive malformed-response corrective reactivations for the
    /// current task (spec §7 "Malformed Response", capped at 2).
    #[serde(default)]
    pub malformed_retries: u32,
}

impl Agent {
    pub fn new(config: AgentConfig, sandbox_path: PathBuf) -> Self {
        Self {
            config,
            state: AgentState::Idle,
            history: Vec::new(),
            current_plan: None,
            pending_tool_calls: Vec::new(),
            sandbox_path,
            malformed_retries: 0,
        }
    }

    /// Invariant (spec §3): an agent in `ExecutingTool`/`AwaitingToolResult`
    /// has at least one unresolved tool call pending.
    pub fn invariant_holds(&self) -> bool {
        match self.state {
            AgentState::ExecutingTool | AgentState::AwaitingToolResult => {
                !self.pending_tool_calls.is_empty()
            }
            _ => true,
        }
    }
}

/// A named grouping of agents for `send_message` scoping (spec §3 "Team").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub team_id: String,
    pub members: Vec<String>,
}

impl Team {
    pub fn new(team_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            members: Vec::new(),
        }
    }
}
