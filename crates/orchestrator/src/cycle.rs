//! CycleHandler (C8, spec §4.8): runs one LLM generation for one agent —
//! assemble prompt, acquire a key, stream, parse, dispatch tool calls,
//! decide reactivation — and implements the retry / key-rotation / model
//! failover cascade on failure (spec §4.8 step 7, §7).

use crate::events::EventSink;
use crate::interaction::{Action, AgentSummary, InteractionHandler, InteractionOutcome};
use crate::lifecycle::AgentLifecycle;
use futures_util::StreamExt;
use rand::Rng;
use sa_domain::agent::{Agent, AgentState};
use sa_domain::error::Result;
use sa_domain::message::Message;
use sa_domain::stream::{ErrorKind, StreamEvent};
use sa_domain::trace::TraceEvent;
use sa_prompts::{Phase, PromptAssembler, Role, Substitutions};
use sa_providers::keys::{ProviderKeyManager, DEFAULT_AUTH_QUARANTINE, DEFAULT_RATE_LIMIT_QUARANTINE};
use sa_providers::perf::PerformanceTracker;
use sa_providers::registry::{format_available, ModelRegistry};
use sa_providers::traits::{ChatRequest, LlmProvider};
use sa_tools::file_system::FileSystemRoots;
use sa_tools::parser::{extract_plan, parse_tool_calls};
use sa_tools::registry::{tool_descriptions_xml, KNOWN_TOOLS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_TRANSIENT_RETRIES: u32 = 3;
const MAX_MALFORMED_RETRIES: u32 = 2;
const TRANSIENT_BACKOFF_MS: [u64; 3] = [500, 1000, 2000];
pub const DEFAULT_MAX_FAILOVER_ATTEMPTS: u32 = 5;

/// No delta for this long on an open stream is treated as a transient
/// network hiccup, not a hang (spec §5 "Timeouts").
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Per-tool execution timeouts (spec §5 "Timeouts"); `send_message` has
/// none since delivery is an in-memory, immediate operation.
const FILE_SYSTEM_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const MANAGE_TEAM_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

fn tool_timeout(tool_name: &str) -> Option<Duration> {
    match tool_name {
        "file_system" => Some(FILE_SYSTEM_TOOL_TIMEOUT),
        "manage_team" => Some(MANAGE_TEAM_TOOL_TIMEOUT),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Idle,
    Reactivate,
    Error { reason: String },
}

pub struct CycleResult {
    pub outcome: CycleOutcome,
    pub actions: Vec<Action>,
}

enum AttemptResult {
    Success { text: String, latency_ns: u64 },
    Failure { kind: ErrorKind, detail: String, latency_ns: u64 },
}

enum FailureAction {
    RetrySameKey,
    RetryNewKey { quarantine: Duration, reason: String },
    Failover { reason: String },
}

fn classify(kind: ErrorKind, transient_retries: u32) -> FailureAction {
    match kind {
        ErrorKind::TransientNetwork | ErrorKind::ProviderInternal if transient_retries < MAX_TRANSIENT_RETRIES => {
            FailureAction::RetrySameKey
        }
        ErrorKind::TransientNetwork | ErrorKind::ProviderInternal => FailureAction::Failover {
            reason: "transient retries exhausted".into(),
        },
        ErrorKind::RateLimited => FailureAction::RetryNewKey {
            quarantine: DEFAULT_RATE_LIMIT_QUARANTINE,
            reason: "rate limited".into(),
        },
        ErrorKind::AuthFailed => FailureAction::RetryNewKey {
            quarantine: DEFAULT_AUTH_QUARANTINE,
            reason: "auth failed".into(),
        },
        ErrorKind::ModelUnavailable | ErrorKind::InvalidRequest => FailureAction::Failover {
            reason: "model unavailable or invalid request".into(),
        },
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = TRANSIENT_BACKOFF_MS[(attempt as usize).saturating_sub(1).min(2)];
    let jitter_pct = rand::thread_rng().gen_range(-20..=20);
    let millis = (base as i64 + base as i64 * jitter_pct / 100).max(0) as u64;
    Duration::from_millis(millis)
}

pub struct CycleHandler {
    keys: Arc<ProviderKeyManager>,
    perf: Arc<PerformanceTracker>,
    registry: Arc<ModelRegistry>,
    prompts: Arc<PromptAssembler>,
    interaction: Arc<InteractionHandler>,
    lifecycle: Arc<AgentLifecycle>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    max_failover_attempts: u32,
}

impl CycleHandler {
    pub fn new(
        keys: Arc<ProviderKeyManager>,
        perf: Arc<PerformanceTracker>,
        registry: Arc<ModelRegistry>,
        prompts: Arc<PromptAssembler>,
        interaction: Arc<InteractionHandler>,
        lifecycle: Arc<AgentLifecycle>,
        providers: HashMap<String, Arc<dyn LlmProvider>>,
        max_failover_attempts: u32,
    ) -> Self {
        Self {
            keys,
            perf,
            registry,
            prompts,
            interaction,
            lifecycle,
            providers,
            max_failover_attempts,
        }
    }

    fn system_text(&self, agent: &Agent, role: Role) -> Result<String> {
        match role {
            Role::Standard => Ok(agent.config.system_prompt.clone().unwrap_or_default()),
            Role::AdminAi(phase) => {
                let available = format_available(&self.registry.list_model_info());
                let subs = Substitutions {
                    agent_id: &agent.config.agent_id,
                    team_id: None,
                    tool_descriptions_xml: &tool_descriptions_xml(),
                    available_models: &available,
                };
                self.prompts.compose_system_prompt(Role::AdminAi(phase), "", &subs)
            }
        }
    }

    fn assemble_messages(&self, agent: &Agent, role: Role) -> Result<Vec<Message>> {
        let system_text = self.system_text(agent, role)?;
        let mut messages = vec![Message::system(system_text)];
        messages.extend(agent.history.iter().cloned());
        Ok(messages)
    }

    /// Run one full cycle (spec §4.8): may internally retry/rotate keys and
    /// fail over models before returning. `role` tells the handler whether
    /// this turn must emit a `<plan>` (Admin AI planning), must emit tool
    /// calls (Admin AI execution / standard agent), or neither.
    pub async fn run(
        &self,
        agent: &mut Agent,
        role: Role,
        sink: &dyn EventSink,
        known_agents: &[AgentSummary],
        roots: &FileSystemRoots,
        cancel: CancellationToken,
    ) -> CycleResult {
        let agent_id = agent.config.agent_id.clone();
        let cycle_id = format!("cyc_{}", uuid::Uuid::new_v4().as_simple());
        agent.state = if matches!(role, Role::AdminAi(Phase::Planning)) {
            AgentState::Planning
        } else {
            AgentState::Processing
        };
        sink.agent_status(&agent_id, agent.state);

        let mut failover_attempts: u32 = 0;

        loop {
            let messages = match self.assemble_messages(agent, role) {
                Ok(m) => m,
                Err(e) => return self.exhausted(agent, sink, e.to_string()),
            };

            let provider_id = agent.config.provider.clone();
            let Some((mut api_key, mut lease)) = self.keys.acquire(&provider_id) else {
                match self.attempt_failover(agent, &mut failover_attempts, "no available provider key") {
                    Some(reason) => return self.exhausted(agent, sink, reason),
                    None => continue,
                }
            };

            let Some(provider) = self.providers.get(&provider_id).cloned() else {
                return self.exhausted(agent, sink, format!("no adapter registered for provider '{provider_id}'"));
            };

            TraceEvent::CycleStarted {
                agent_id: agent_id.clone(),
                cycle_id: cycle_id.clone(),
                provider: provider_id.clone(),
                model: agent.config.model.clone(),
            }
            .emit();

            let mut transient_retries = 0u32;
            let attempt_outcome = loop {
                let req = ChatRequest {
                    model: agent.config.model.clone(),
                    messages: messages.clone(),
                    temperature: agent.config.temperature,
                    max_tokens: None,
                    api_key: api_key.clone(),
                    extras: Default::default(),
                };

                let result = self.run_one_attempt(provider.as_ref(), req, &agent_id, sink, cancel.child_token()).await;

                match result {
                    AttemptResult::Success { text, latency_ns } => {
                        self.perf.record(&provider_id, &agent.config.model, true, latency_ns);
                        TraceEvent::CycleFinished {
                            agent_id: agent_id.clone(),
                            cycle_id: cycle_id.clone(),
                            success: true,
                            latency_ms: latency_ns / 1_000_000,
                            tool_calls: 0,
                        }
                        .emit();
                        break AttemptResult::Success { text, latency_ns };
                    }
                    AttemptResult::Failure { kind, detail, latency_ns } => {
                        self.perf.record(&provider_id, &agent.config.model, false, latency_ns);
                        match classify(kind, transient_retries) {
                            FailureAction::RetrySameKey => {
                                transient_retries += 1;
                                tokio::time::sleep(backoff_delay(transient_retries)).await;
                                continue;
                            }
                            FailureAction::RetryNewKey { quarantine, reason } => {
                                if let Err(e) = self.keys.quarantine(&lease, quarantine).await {
                                    tracing::warn!(error = %e, "failed to persist key quarantine");
                                }
                                TraceEvent::KeyQuarantined {
                                    provider: provider_id.clone(),
                                    key_fingerprint: "redacted".into(),
                                    duration_secs: quarantine.as_secs(),
                                    reason: reason.clone(),
                                }
                                .emit();
                                match self.keys.acquire(&provider_id) {
                                    Some((new_key, new_lease)) => {
                                        api_key = new_key;
                                        lease = new_lease;
                                        continue;
                                    }
                                    None => break AttemptResult::Failure { kind, detail: reason, latency_ns },
                                }
                            }
                            FailureAction::Failover { reason } => {
                                break AttemptResult::Failure { kind, detail: reason, latency_ns }
                            }
                        }
                    }
                }
            };

            match attempt_outcome {
                AttemptResult::Success { text, .. } => {
                    return self
                        .on_stream_complete(agent, role, text, sink, known_agents, roots, &cycle_id)
                        .await;
                }
                AttemptResult::Failure { detail, .. } => {
                    match self.attempt_failover(agent, &mut failover_attempts, &detail) {
                        Some(reason) => return self.exhausted(agent, sink, reason),
                        None => continue,
                    }
                }
            }
        }
    }

    async fn run_one_attempt(
        &self,
        provider: &dyn LlmProvider,
        req: ChatRequest,
        agent_id: &str,
        sink: &dyn EventSink,
        cancel: CancellationToken,
    ) -> AttemptResult {
        let started = std::time::Instant::now();
        let mut stream = match provider.stream(req, cancel).await {
            Ok(s) => s,
            Err(e) => {
                return AttemptResult::Failure {
                    kind: ErrorKind::TransientNetwork,
                    detail: e.to_string(),
                    latency_ns: started.elapsed().as_nanos() as u64,
                }
            }
        };

        let mut assistant_text = String::new();
        loop {
            let next = match tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return AttemptResult::Failure {
                        kind: ErrorKind::TransientNetwork,
                        detail: format!("no delta received for {}s", STREAM_IDLE_TIMEOUT.as_secs()),
                        latency_ns: started.elapsed().as_nanos() as u64,
                    };
                }
            };
            let Some(event) = next else { break };
            match event {
                Ok(StreamEvent::Delta { text }) => {
                    assistant_text.push_str(&text);
                    sink.content_chunk(agent_id, &text);
                }
                Ok(StreamEvent::Done { .. }) => {
                    return AttemptResult::Success {
                        text: assistant_text,
                        latency_ns: started.elapsed().as_nanos() as u64,
                    };
                }
                Ok(StreamEvent::Error { kind, detail, .. }) => {
                    return AttemptResult::Failure {
                        kind,
                        detail,
                        latency_ns: started.elapsed().as_nanos() as u64,
                    };
                }
                Err(e) => {
                    return AttemptResult::Failure {
                        kind: ErrorKind::TransientNetwork,
                        detail: e.to_string(),
                        latency_ns: started.elapsed().as_nanos() as u64,
                    };
                }
            }
        }

        // Stream closed without an explicit Done: treat as a transient hiccup.
        AttemptResult::Failure {
            kind: ErrorKind::TransientNetwork,
            detail: "stream closed without a done event".into(),
            latency_ns: started.elapsed().as_nanos() as u64,
        }
    }

    async fn on_stream_complete(
        &self,
        agent: &mut Agent,
        role: Role,
        assistant_text: String,
        sink: &dyn EventSink,
        known_agents: &[AgentSummary],
        roots: &FileSystemRoots,
        cycle_id: &str,
    ) -> CycleResult {
        let assistant_message = Message::assistant(assistant_text.clone());
        agent.history.push(assistant_message.clone());
        sink.message_appended(&agent.config.agent_id, &assistant_message);

        if matches!(role, Role::AdminAi(Phase::Planning)) {
            return self.handle_planning_turn(agent, &assistant_text, sink);
        }

        let tool_calls = parse_tool_calls(&assistant_text, KNOWN_TOOLS, 0);
        if tool_calls.is_empty() {
            // Plain-text turn with no tool call: the cycle simply ends (spec
            // §4.8 step 5, state machine Done+no-tools -> idle). Malformed
            // recovery is reserved for turns that required a tool call and
            // didn't produce one (planning's missing <plan>, handled above).
            agent.malformed_retries = 0;
            agent.state = AgentState::Idle;
            sink.agent_status(&agent.config.agent_id, agent.state);
            return CycleResult {
                outcome: CycleOutcome::Idle,
                actions: Vec::new(),
            };
        }
        agent.malformed_retries = 0;
        agent.state = AgentState::ExecutingTool;
        agent.pending_tool_calls = tool_calls.clone();
        sink.agent_status(&agent.config.agent_id, agent.state);

        let mut actions = Vec::new();
        let mut any_non_send_ran = false;
        let mut any_send_failed = false;

        for call in &tool_calls {
            TraceEvent::ToolDispatched {
                agent_id: agent.config.agent_id.clone(),
                cycle_id: cycle_id.to_string(),
                tool_name: call.tool_name.clone(),
                call_id: call.call_id.clone(),
            }
            .emit();

            let handle_fut = self.interaction.handle(&agent.config.agent_id, call, roots, known_agents);
            let outcome = match tool_timeout(&call.tool_name) {
                Some(limit) => match tokio::time::timeout(limit, handle_fut).await {
                    Ok(outcome) => outcome,
                    Err(_) => InteractionOutcome {
                        tool_message: Message::tool_result(
                            call.call_id.clone(),
                            call.tool_name.clone(),
                            format!("ERROR: {} timed out after {}s", call.tool_name, limit.as_secs()),
                        ),
                        actions: Vec::new(),
                    },
                },
                None => handle_fut.await,
            };

            sink.tool_result(&agent.config.agent_id, &call.call_id, &outcome.tool_message.content);
            agent.history.push(outcome.tool_message.clone());
            sink.message_appended(&agent.config.agent_id, &outcome.tool_message);

            if call.tool_name == "send_message" {
                if outcome.tool_message.content.starts_with("ERROR") {
                    any_send_failed = true;
                }
            } else {
                any_non_send_ran = true;
            }

            actions.extend(outcome.actions);
            agent.pending_tool_calls.retain(|c| c.call_id != call.call_id);
        }

        agent.state = AgentState::AwaitingToolResult;
        sink.agent_status(&agent.config.agent_id, agent.state);

        let reactivate = any_non_send_ran || any_send_failed;
        agent.state = AgentState::Idle;
        sink.agent_status(&agent.config.agent_id, agent.state);

        CycleResult {
            outcome: if reactivate { CycleOutcome::Reactivate } else { CycleOutcome::Idle },
            actions,
        }
    }

    fn handle_planning_turn(&self, agent: &mut Agent, assistant_text: &str, sink: &dyn EventSink) -> CycleResult {
        match extract_plan(assistant_text) {
            Some(plan) => {
                agent.malformed_retries = 0;
                agent.current_plan = Some(plan);
                agent.history.push(Message::user("Plan approved. Proceed to execution."));
                agent.state = AgentState::Idle;
                sink.agent_status(&agent.config.agent_id, agent.state);
                CycleResult {
                    outcome: CycleOutcome::Reactivate,
                    actions: Vec::new(),
                }
            }
            None => {
                let outcome = self.handle_malformed(agent, sink, "planning turn produced no <plan> element");
                outcome
            }
        }
    }

    fn handle_malformed(&self, agent: &mut Agent, sink: &dyn EventSink, reason: &str) -> CycleResult {
        agent.malformed_retries += 1;
        if agent.malformed_retries > MAX_MALFORMED_RETRIES {
            let result = self.exhausted(agent, sink, format!("malformed response: {reason}"));
            return CycleResult {
                outcome: result.outcome,
                actions: Vec::new(),
            };
        }
        agent
            .history
            .push(Message::user(format!("Your previous turn was invalid: {reason}. Please try again.")));
        agent.state = AgentState::Idle;
        sink.agent_status(&agent.config.agent_id, agent.state);
        CycleResult {
            outcome: CycleOutcome::Reactivate,
            actions: Vec::new(),
        }
    }

    /// Select the next `(provider, model)` to fail over to (spec §4.8
    /// "Model failover"): prefer same provider, then local, then free, then
    /// paid, filtered by performance rank. Returns `Some(reason)` if the
    /// attempt budget (`MAX_FAILOVER_ATTEMPTS`) is exhausted, else updates
    /// `agent.config` in place and returns `None` to retry the cycle loop.
    fn attempt_failover(&self, agent: &mut Agent, failover_attempts: &mut u32, reason: &str) -> Option<String> {
        if *failover_attempts >= self.max_failover_attempts {
            return Some(format!("failover attempts exhausted ({reason})"));
        }
        *failover_attempts += 1;

        let exclude = vec![(agent.config.provider.clone(), agent.config.model.clone())];
        let available = self.registry.list_available();
        let same_provider: Vec<(String, String)> = available
            .iter()
            .filter(|(p, m)| p == &agent.config.provider && !exclude.contains(&(p.clone(), m.clone())))
            .cloned()
            .collect();

        let candidates = if !same_provider.is_empty() {
            same_provider
        } else {
            available.into_iter().filter(|pair| !exclude.contains(pair)).collect()
        };

        match self.lifecycle.select_best_available_model(&exclude).ok().filter(|pair| candidates.contains(pair)).or_else(|| {
            let ranked = self.perf.rank(&candidates);
            ranked.into_iter().next().or_else(|| candidates.into_iter().next())
        }) {
            Some((provider, model)) => {
                TraceEvent::ModelFailover {
                    agent_id: agent.config.agent_id.clone(),
                    from_provider: agent.config.provider.clone(),
                    from_model: agent.config.model.clone(),
                    to_provider: provider.clone(),
                    to_model: model.clone(),
                    attempt: *failover_attempts,
                    reason: reason.to_string(),
                }
                .emit();
                agent.config.provider = provider;
                agent.config.model = model;
                None
            }
            None => Some(format!("no remaining model to fail over to ({reason})")),
        }
    }

    fn exhausted(&self, agent: &mut Agent, sink: &dyn EventSink, reason: String) -> CycleResult {
        // Provider error detail may echo request/response text verbatim
        // (spec §7: "a truncated detail" — "where safe" excludes secrets).
        let reason = sa_domain::secret::mask_secrets(&reason);
        agent.state = AgentState::Error;
        sink.agent_status(&agent.config.agent_id, agent.state);
        sink.error(&agent.config.agent_id, &reason);
        sink.override_required(&agent.config.agent_id, &reason);
        TraceEvent::AgentOverrideRequired {
            agent_id: agent.config.agent_id.clone(),
            reason: reason.clone(),
        }
        .emit();
        CycleResult {
            outcome: CycleOutcome::Error { reason },
            actions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_timeouts_match_spec_durations() {
        assert_eq!(tool_timeout("file_system"), Some(Duration::from_secs(30)));
        assert_eq!(tool_timeout("manage_team"), Some(Duration::from_secs(10)));
        assert_eq!(tool_timeout("send_message"), None);
    }

    #[test]
    fn transient_errors_retry_until_budget_then_failover() {
        assert!(matches!(classify(ErrorKind::TransientNetwork, 0), FailureAction::RetrySameKey));
        assert!(matches!(classify(ErrorKind::TransientNetwork, 2), FailureAction::RetrySameKey));
        assert!(matches!(classify(ErrorKind::TransientNetwork, 3), FailureAction::Failover { .. }));
    }

    #[test]
    fn rate_limited_retries_with_new_key() {
        assert!(matches!(classify(ErrorKind::RateLimited, 0), FailureAction::RetryNewKey { .. }));
    }

    #[test]
    fn auth_failed_retries_with_new_key_longer_quarantine() {
        match classify(ErrorKind::AuthFailed, 0) {
            FailureAction::RetryNewKey { quarantine, .. } => {
                assert_eq!(quarantine, DEFAULT_AUTH_QUARANTINE);
            }
            _ => panic!("expected RetryNewKey"),
        }
    }

    #[test]
    fn model_unavailable_cascades_straight_to_failover() {
        assert!(matches!(classify(ErrorKind::ModelUnavailable, 0), FailureAction::Failover { .. }));
        assert!(matches!(classify(ErrorKind::InvalidRequest, 0), FailureAction::Failover { .. }));
    }

    #[test]
    fn backoff_grows_with_attempt_number_within_jitter() {
        let d1 = backoff_delay(1).as_millis();
        let d3 = backoff_delay(3).as_millis();
        assert!(d1 >= 400 && d1 <= 600);
        assert!(d3 >= 1600 && d3 <= 2400);
    }
}
