//! InteractionHandler (C7, spec §4.7): turns one parsed tool call into a
//! `tool` message plus zero or more framework actions. Never touches the
//! LLM; file I/O is delegated to `sa_tools::file_system`, agent creation to
//! `AgentLifecycle`, team/membership bookkeeping to `StateManager`.

use crate::lifecycle::{AgentLifecycle, CreateAgentSpec};
use sa_domain::agent::Agent;
use sa_domain::message::{Message, ToolCall};
use sa_state::StateManager;
use sa_tools::file_system::{self, FileSystemRoots};
use std::sync::Arc;

/// A side-effect the caller (the orchestrator) must apply to live,
/// in-memory state that `InteractionHandler` itself cannot reach.
#[derive(Debug, Clone)]
pub enum Action {
    AgentCreated(Box<Agent>),
    AgentDeleted { agent_id: String },
    DeliverMessage { target_agent_id: String, message: Message },
}

#[derive(Debug, Clone)]
pub struct InteractionOutcome {
    pub tool_message: Message,
    pub actions: Vec<Action>,
}

impl InteractionOutcome {
    fn message_only(tool_message: Message) -> Self {
        Self {
            tool_message,
            actions: Vec::new(),
        }
    }
}

/// What `send_message` needs to know about every other live agent to
/// resolve a `target_agent_id` that names a persona rather than an id
/// (spec §4.5, testable property #4).
#[derive(Debug, Clone)]
pub struct AgentSummary {
    pub agent_id: String,
    pub persona: String,
}

pub struct InteractionHandler {
    state: Arc<StateManager>,
    lifecycle: Arc<AgentLifecycle>,
}

impl InteractionHandler {
    pub fn new(state: Arc<StateManager>, lifecycle: Arc<AgentLifecycle>) -> Self {
        Self { state, lifecycle }
    }

    /// Dispatch one tool call from `caller_agent_id`'s turn.
    pub async fn handle(
        &self,
        caller_agent_id: &str,
        call: &ToolCall,
        roots: &FileSystemRoots,
        known_agents: &[AgentSummary],
    ) -> InteractionOutcome {
        match call.tool_name.as_str() {
            "file_system" => self.handle_file_system(call, roots).await,
            "send_message" => self.handle_send_message(caller_agent_id, call, known_agents),
            "manage_team" => self.handle_manage_team(call),
            other => InteractionOutcome::message_only(error_message(call, &format!("unknown tool {other}"))),
        }
    }

    async fn handle_file_system(&self, call: &ToolCall, roots: &FileSystemRoots) -> InteractionOutcome {
        match file_system::execute(call, roots).await {
            Ok(value) => InteractionOutcome::message_only(Message::tool_result(
                call.call_id.clone(),
                call.tool_name.clone(),
                value.to_string(),
            )),
            Err(e) => InteractionOutcome::message_only(error_message(call, &e)),
        }
    }

    /// Spec §4.5 `send_message` / testable properties #3, #4: exact id
    /// match wins; otherwise fall back to a unique persona match; zero or
    /// more than one persona match is an error reported to the sender, not
    /// a silent route.
    fn handle_send_message(
        &self,
        caller_agent_id: &str,
        call: &ToolCall,
        known_agents: &[AgentSummary],
    ) -> InteractionOutcome {
        let target = match call.arg("target_agent_id") {
            Some(t) => t,
            None => return InteractionOutcome::message_only(error_message(call, "send_message missing 'target_agent_id'")),
        };
        let content = call.arg("message_content").unwrap_or("");

        let resolved = if known_agents.iter().any(|a| a.agent_id == target) {
            Some(target.to_string())
        } else {
            let matches: Vec<&AgentSummary> = known_agents.iter().filter(|a| a.persona == target).collect();
            match matches.len() {
                1 => Some(matches[0].agent_id.clone()),
                0 => None,
                _ => {
                    return InteractionOutcome::message_only(error_message(
                        call,
                        &format!("ambiguous persona '{target}' matches {} agents", matches.len()),
                    ))
                }
            }
        };

        let Some(target_agent_id) = resolved else {
            return InteractionOutcome::message_only(error_message(call, &format!("no such agent or persona '{target}'")));
        };

        let delivered = Message::delivered_from(caller_agent_id, content);
        InteractionOutcome {
            tool_message: Message::tool_result(
                call.call_id.clone(),
                call.tool_name.clone(),
                serde_json::json!({ "delivered_to": target_agent_id }).to_string(),
            ),
            actions: vec![Action::DeliverMessage {
                target_agent_id,
                message: delivered,
            }],
        }
    }

    fn handle_manage_team(&self, call: &ToolCall) -> InteractionOutcome {
        let action = match call.arg("action") {
            Some(a) => a,
            None => return InteractionOutcome::message_only(error_message(call, "manage_team missing 'action'")),
        };

        match action {
            "create_team" => match call.arg("team_id") {
                Some(team_id) => {
                    self.state.create_team(team_id);
                    InteractionOutcome::message_only(ok_message(call, serde_json::json!({ "team_id": team_id })))
                }
                None => InteractionOutcome::message_only(error_message(call, "create_team missing 'team_id'")),
            },
            "delete_team" => match call.arg("team_id") {
                Some(team_id) => match self.state.delete_team(team_id) {
                    Ok(()) => InteractionOutcome::message_only(ok_message(call, serde_json::json!({ "team_id": team_id }))),
                    Err(e) => InteractionOutcome::message_only(error_message(call, &e.to_string())),
                },
                None => InteractionOutcome::message_only(error_message(call, "delete_team missing 'team_id'")),
            },
            "create_agent" => self.handle_create_agent(call),
            "delete_agent" => match call.arg("agent_id") {
                Some(agent_id) => {
                    let agent_id = agent_id.to_string();
                    match self.lifecycle.delete_agent(&agent_id, false) {
                        Ok(()) => InteractionOutcome {
                            tool_message: ok_message(call, serde_json::json!({ "agent_id": agent_id })),
                            actions: vec![Action::AgentDeleted {
                                agent_id,
                            }],
                        },
                        Err(e) => InteractionOutcome::message_only(error_message(call, &e.to_string())),
                    }
                }
                None => InteractionOutcome::message_only(error_message(call, "delete_agent missing 'agent_id'")),
            },
            "list_teams" => {
                let teams = self.state.list_teams();
                InteractionOutcome::message_only(ok_message(call, serde_json::json!({ "teams": teams })))
            }
            "list_agents" => {
                let agents = self.state.list_agents();
                InteractionOutcome::message_only(ok_message(call, serde_json::json!({ "agents": agents })))
            }
            other => InteractionOutcome::message_only(error_message(call, &format!("unknown manage_team action '{other}'"))),
        }
    }

    fn handle_create_agent(&self, call: &ToolCall) -> InteractionOutcome {
        let spec = CreateAgentSpec {
            agent_id: call.arg("agent_id").map(str::to_string),
            persona: call.arg("persona").unwrap_or("Agent").to_string(),
            provider: call.arg("provider").map(str::to_string),
            model: call.arg("model").map(str::to_string),
            system_prompt: call.arg("system_prompt").map(str::to_string),
            temperature: call
                .arguments
                .get("temperature")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f32>().ok()),
            team_id: call.arg("team_id").map(str::to_string),
            is_admin: false,
            phase: None,
        };

        match self.lifecycle.create_agent(spec) {
            Ok(agent) => {
                let agent_id = agent.config.agent_id.clone();
                InteractionOutcome {
                    tool_message: ok_message(call, serde_json::json!({ "agent_id": agent_id })),
                    actions: vec![Action::AgentCreated(Box::new(agent))],
                }
            }
            Err(e) => InteractionOutcome::message_only(error_message(call, &e.to_string())),
        }
    }
}

fn ok_message(call: &ToolCall, value: serde_json::Value) -> Message {
    Message::tool_result(call.call_id.clone(), call.tool_name.clone(), value.to_string())
}

fn error_message(call: &ToolCall, detail: &str) -> Message {
    Message::tool_result(call.call_id.clone(), call.tool_name.clone(), format!("ERROR: {detail}"))
}
