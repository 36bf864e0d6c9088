//! PromptAssembler (C12, spec §4.12): loads the prompt template file at
//! startup and renders per-agent system prompts by substituting
//! `{agent_id}`, `{team_id}`, `{tool_descriptions_xml}` and
//! `{available_models}` into the keyed templates (spec §6).

use sa_domain::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

pub const KEY_STANDARD_FRAMEWORK_INSTRUCTIONS: &str = "standard_framework_instructions";
pub const KEY_ADMIN_AI_PLANNING: &str = "admin_ai_planning";
pub const KEY_ADMIN_AI_EXECUTION: &str = "admin_ai_execution";
pub const KEY_DEFAULT_SYSTEM_PROMPT: &str = "default_system_prompt";
pub const KEY_DEFAULT_AGENT_PERSONA: &str = "default_agent_persona";

/// Which template set a cycle's system prompt is built from (spec §4.12:
/// Admin AI alternates between a planning phase, which must emit `<plan>`,
/// and an execution phase, which must emit tool calls; every other agent
/// uses the single standard-agent template regardless of phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Execution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    AdminAi(Phase),
    Standard,
}

/// Parameters substituted into every rendered template. Any of `{agent_id}`,
/// `{team_id}`, `{tool_descriptions_xml}`, `{available_models}` not present
/// in a given template are simply unused — rendering never fails on an
/// unreferenced placeholder.
#[derive(Debug, Clone, Default)]
pub struct Substitutions<'a> {
    pub agent_id: &'a str,
    pub team_id: Option<&'a str>,
    pub tool_descriptions_xml: &'a str,
    pub available_models: &'a str,
}

pub struct PromptAssembler {
    templates: HashMap<String, String>,
}

impl PromptAssembler {
    /// Load a TOML file of `{template_name: template_body}` entries. Keys
    /// the assembler doesn't know about are kept and ignored; keys it needs
    /// that are missing fall back to the built-in defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(Error::Io)?;
        let loaded: HashMap<String, String> =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid prompt templates file: {e}")))?;
        let mut templates = default_templates();
        templates.extend(loaded);
        Ok(Self { templates })
    }

    pub fn with_defaults() -> Self {
        Self {
            templates: default_templates(),
        }
    }

    fn render(&self, key: &str, subs: &Substitutions) -> Result<String> {
        let template = self
            .templates
            .get(key)
            .ok_or_else(|| Error::Config(format!("missing prompt template '{key}'")))?;
        Ok(substitute(template, subs))
    }

    /// Build the full system prompt for one agent: base template + standard
    /// framework instructions + role-specific instructions (+ persona for
    /// standard agents), each rendered with the same substitutions.
    pub fn compose_system_prompt(
        &self,
        role: Role,
        persona_prompt: &str,
        subs: &Substitutions,
    ) -> Result<String> {
        let base = self.render(KEY_DEFAULT_SYSTEM_PROMPT, subs)?;
        let framework = self.render(KEY_STANDARD_FRAMEWORK_INSTRUCTIONS, subs)?;

        let role_section = match role {
            Role::AdminAi(Phase::Planning) => self.render(KEY_ADMIN_AI_PLANNING, subs)?,
            Role::AdminAi(Phase::Execution) => self.render(KEY_ADMIN_AI_EXECUTION, subs)?,
            Role::Standard => substitute(persona_prompt, subs),
        };

        Ok(format!("{base}\n\n{framework}\n\n{role_section}"))
    }
}

fn substitute(template: &str, subs: &Substitutions) -> String {
    template
        .replace("{agent_id}", subs.agent_id)
        .replace("{team_id}", subs.team_id.unwrap_or(""))
        .replace("{tool_descriptions_xml}", subs.tool_descriptions_xml)
        .replace("{available_models}", subs.available_models)
}

fn default_templates() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert(
        KEY_DEFAULT_SYSTEM_PROMPT.to_string(),
        "You are agent {agent_id}, part of team {team_id}.".to_string(),
    );
    m.insert(
        KEY_STANDARD_FRAMEWORK_INSTRUCTIONS.to_string(),
        "You act by emitting exactly one or more of the following XML tool calls per turn:\n{tool_descriptions_xml}\nModels currently available to this system: {available_models}.".to_string(),
    );
    m.insert(
        KEY_ADMIN_AI_PLANNING.to_string(),
        "You are in the planning phase. Before taking any action, emit a <plan>...</plan> element describing how you will decompose this request into a team.".to_string(),
    );
    m.insert(
        KEY_ADMIN_AI_EXECUTION.to_string(),
        "You are in the execution phase. Use manage_team and send_message to build and direct your team; you must emit at least one tool call this turn.".to_string(),
    );
    m.insert(
        KEY_DEFAULT_AGENT_PERSONA.to_string(),
        "You are a capable assistant collaborating on a shared task. When your part of the task is complete, you must send_message your result back to whoever requested it.".to_string(),
    );
    m
}
