//! AgentLifecycle (C9, spec §4.9): create/delete agents, inject standard
//! prompts, auto-pick a model when the caller omits one.

use crate::config::AgentLimitsConfig;
use rand::Rng;
use sa_domain::agent::{Agent, AgentConfig};
use sa_domain::error::{Error, Result};
use sa_prompts::{Phase, PromptAssembler, Role as PromptRole, Substitutions};
use sa_providers::registry::{format_available, ModelRegistry};
use sa_providers::perf::PerformanceTracker;
use sa_state::StateManager;
use sa_tools::registry::tool_descriptions_xml;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;

fn id_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"))
}

/// Caller-supplied parameters for a new agent (spec §4.5 `manage_team`
/// `create_agent`, and bootstrap agent entries).
#[derive(Debug, Clone, Default)]
pub struct CreateAgentSpec {
    pub agent_id: Option<String>,
    pub persona: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub team_id: Option<String>,
    pub is_admin: bool,
    pub phase: Option<Phase>,
}

pub struct AgentLifecycle {
    state: Arc<StateManager>,
    registry: Arc<ModelRegistry>,
    perf: Arc<PerformanceTracker>,
    prompts: Arc<PromptAssembler>,
    sandbox_root: PathBuf,
    limits: AgentLimitsConfig,
}

impl AgentLifecycle {
    pub fn new(
        state: Arc<StateManager>,
        registry: Arc<ModelRegistry>,
        perf: Arc<PerformanceTracker>,
        prompts: Arc<PromptAssembler>,
        sandbox_root: PathBuf,
        limits: AgentLimitsConfig,
    ) -> Self {
        Self {
            state,
            registry,
            perf,
            prompts,
            sandbox_root,
            limits,
        }
    }

    /// Highest-ranked `(provider, model)` available per the registry and not
    /// in `exclude`, tie-broken local > free > paid, then alphabetically
    /// (spec §4.9).
    pub fn select_best_available_model(&self, exclude: &[(String, String)]) -> Result<(String, String)> {
        let available = self.registry.list_available();
        if available.is_empty() {
            return Err(Error::Config("no models available to auto-select from".into()));
        }

        let candidates: Vec<(String, String)> = available
            .iter()
            .filter(|pair| !exclude.contains(pair))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(Error::Config("no remaining models to fail over to".into()));
        }

        let ranked = self.perf.rank(&candidates);
        if let Some(best) = ranked.into_iter().next() {
            return Ok(best);
        }

        // No candidate has enough recorded calls to be ranked yet: fall back
        // to the local > free > paid, then alphabetical tie-break directly
        // over registry metadata.
        let mut infos: Vec<_> = self
            .registry
            .list_model_info()
            .into_iter()
            .filter(|m| candidates.contains(&(m.provider.clone(), m.model.clone())))
            .collect();
        infos.sort_by(|a, b| {
            let rank_a = (!a.is_local, !a.is_free, a.provider.clone(), a.model.clone());
            let rank_b = (!b.is_local, !b.is_free, b.provider.clone(), b.model.clone());
            rank_a.cmp(&rank_b)
        });
        infos
            .into_iter()
            .next()
            .map(|m| (m.provider, m.model))
            .ok_or_else(|| Error::Config("no remaining models to fail over to".into()))
    }

    fn generate_id(persona: &str) -> String {
        let slug: String = persona
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let slug = slug.trim_matches('_');
        let slug = if slug.is_empty() { "agent" } else { slug };
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("{slug}_{suffix:06x}")
    }

    /// Create, validate, register, and return a new [`Agent`] (spec §4.9).
    /// Does not activate a cycle; the caller decides whether/when to.
    pub fn create_agent(&self, spec: CreateAgentSpec) -> Result<Agent> {
        if self.state.list_agents().len() >= self.limits.max_agents {
            return Err(Error::Config(format!(
                "agent limit reached ({} agents)",
                self.limits.max_agents
            )));
        }

        let agent_id = match spec.agent_id {
            Some(id) => {
                if !id_regex().is_match(&id) {
                    return Err(Error::Config(format!(
                        "agent_id '{id}' must match [A-Za-z0-9_-]+"
                    )));
                }
                if self.state.agent_exists(&id) {
                    return Err(Error::Config(format!("agent_id '{id}' already exists")));
                }
                id
            }
            None => {
                let mut candidate = Self::generate_id(&spec.persona);
                while self.state.agent_exists(&candidate) {
                    candidate = Self::generate_id(&spec.persona);
                }
                candidate
            }
        };

        let (provider, model) = match (spec.provider, spec.model) {
            (Some(p), Some(m)) => (p, m),
            _ => self.select_best_available_model(&[])?,
        };

        let sandbox_path = self.sandbox_root.join(&agent_id);
        std::fs::create_dir_all(&sandbox_path).map_err(Error::Io)?;

        let available = format_available(&self.registry.list_model_info());
        let subs = Substitutions {
            agent_id: &agent_id,
            team_id: spec.team_id.as_deref(),
            tool_descriptions_xml: &tool_descriptions_xml(),
            available_models: &available,
        };
        let role = if spec.is_admin {
            PromptRole::AdminAi(spec.phase.unwrap_or(Phase::Planning))
        } else {
            PromptRole::Standard
        };
        let persona_prompt = spec.system_prompt.clone().unwrap_or_default();
        let system_prompt = self.prompts.compose_system_prompt(role, &persona_prompt, &subs)?;

        let mut config = AgentConfig {
            agent_id: agent_id.clone(),
            persona: spec.persona,
            provider,
            model,
            temperature: spec.temperature.unwrap_or(self.limits.default_temperature),
            system_prompt: Some(system_prompt.clone()),
            extras: Default::default(),
        };
        config.system_prompt = Some(system_prompt);

        self.state.register_agent(&agent_id, spec.team_id.as_deref());

        // The system prompt is not stored in history: the cycle handler
        // assembles it fresh every cycle (composed here once up front for
        // standard agents whose prompt never varies by phase; Admin AI's
        // phase-dependent prompt is recomposed per cycle instead).
        Ok(Agent::new(config, sandbox_path))
    }

    /// Remove `agent_id` from state and purge its sandbox, unless a
    /// snapshot is currently in progress (spec §3 "Lifecycles": "purge
    /// unless snapshot is in progress"). Cancellation of any in-flight
    /// cycle is the orchestrator's responsibility (it owns cancellation
    /// tokens); this only handles the data-layer side-effects.
    pub fn delete_agent(&self, agent_id: &str, snapshot_in_progress: bool) -> Result<()> {
        if !self.state.agent_exists(agent_id) {
            return Err(Error::Other(format!("no such agent '{agent_id}'")));
        }
        self.state.deregister_agent(agent_id);
        if !snapshot_in_progress {
            let path = self.sandbox_root.join(agent_id);
            if path.exists() {
                std::fs::remove_dir_all(&path).map_err(Error::Io)?;
            }
        }
        Ok(())
    }

    pub fn sandbox_path(&self, agent_id: &str) -> PathBuf {
        self.sandbox_root.join(agent_id)
    }

    pub fn sandbox_root(&self) -> &Path {
        &self.sandbox_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_providers::registry::ModelTier;

    fn lifecycle(dir: &Path) -> AgentLifecycle {
        let state = Arc::new(StateManager::new());
        let registry = Arc::new(ModelRegistry::new(vec![], ModelTier::All));
        let perf = Arc::new(PerformanceTracker::with_defaults(dir.join("metrics.json")));
        let prompts = Arc::new(PromptAssembler::with_defaults());
        AgentLifecycle::new(state, registry, perf, prompts, dir.join("sandboxes"), AgentLimitsConfig::default())
    }

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let a = AgentLifecycle::generate_id("Research Lead!");
        let b = AgentLifecycle::generate_id("Research Lead!");
        assert!(id_regex().is_match(&a));
        assert!(id_regex().is_match(&b));
    }

    #[test]
    fn create_agent_with_explicit_provider_model_skips_autoselect() {
        let dir = tempfile::tempdir().unwrap();
        let lc = lifecycle(dir.path());
        let agent = lc
            .create_agent(CreateAgentSpec {
                agent_id: Some("worker_1".into()),
                persona: "Researcher".into(),
                provider: Some("openrouter".into()),
                model: Some("free/model".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(agent.config.agent_id, "worker_1");
        assert_eq!(agent.config.provider, "openrouter");
        assert!(agent.sandbox_path.ends_with("worker_1"));
    }

    #[test]
    fn create_agent_without_models_fails_when_registry_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lc = lifecycle(dir.path());
        let result = lc.create_agent(CreateAgentSpec {
            persona: "Researcher".into(),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_explicit_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let lc = lifecycle(dir.path());
        lc.create_agent(CreateAgentSpec {
            agent_id: Some("dup".into()),
            persona: "A".into(),
            provider: Some("p".into()),
            model: Some("m".into()),
            ..Default::default()
        })
        .unwrap();
        let result = lc.create_agent(CreateAgentSpec {
            agent_id: Some("dup".into()),
            persona: "B".into(),
            provider: Some("p".into()),
            model: Some("m".into()),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn invalid_id_characters_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let lc = lifecycle(dir.path());
        let result = lc.create_agent(CreateAgentSpec {
            agent_id: Some("bad id!".into()),
            persona: "A".into(),
            provider: Some("p".into()),
            model: Some("m".into()),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn delete_agent_purges_sandbox_unless_snapshot_locked() {
        let dir = tempfile::tempdir().unwrap();
        let lc = lifecycle(dir.path());
        let agent = lc
            .create_agent(CreateAgentSpec {
                agent_id: Some("to_delete".into()),
                persona: "A".into(),
                provider: Some("p".into()),
                model: Some("m".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(agent.sandbox_path.exists());
        lc.delete_agent("to_delete", false).unwrap();
        assert!(!agent.sandbox_path.exists());
    }

    #[test]
    fn delete_agent_preserves_sandbox_when_snapshot_locked() {
        let dir = tempfile::tempdir().unwrap();
        let lc = lifecycle(dir.path());
        let agent = lc
            .create_agent(CreateAgentSpec {
                agent_id: Some("keep".into()),
                persona: "A".into(),
                provider: Some("p".into()),
                model: Some("m".into()),
                ..Default::default()
            })
            .unwrap();
        lc.delete_agent("keep", true).unwrap();
        assert!(agent.sandbox_path.exists());
    }

    #[test]
    fn deleting_unknown_agent_errors() {
        let dir = tempfile::tempdir().unwrap();
        let lc = lifecycle(dir.path());
        assert!(lc.delete_agent("ghost", false).is_err());
    }

    #[test]
    fn agent_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let lc = AgentLifecycle::new(
            Arc::new(StateManager::new()),
            Arc::new(ModelRegistry::new(vec![], ModelTier::All)),
            Arc::new(PerformanceTracker::with_defaults(dir.path().join("m.json"))),
            Arc::new(PromptAssembler::with_defaults()),
            dir.path().join("sandboxes"),
            AgentLimitsConfig {
                max_agents: 1,
                ..Default::default()
            },
        );
        lc.create_agent(CreateAgentSpec {
            agent_id: Some("first".into()),
            persona: "A".into(),
            provider: Some("p".into()),
            model: Some("m".into()),
            ..Default::default()
        })
        .unwrap();
        let result = lc.create_agent(CreateAgentSpec {
            agent_id: Some("second".into()),
            persona: "B".into(),
            provider: Some("p".into()),
            model: Some("m".into()),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
