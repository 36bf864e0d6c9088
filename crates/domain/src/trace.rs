//! Structured trace events emitted across the orchestration crates
//! (spec §10.1). Mirrors the donor workspace's tagged `TraceEvent` + `emit()`
//! pattern, with a vocabulary drawn from this system's own domain: cycles,
//! tool dispatch, key quarantine, model failover, agent/team lifecycle, and
//! session snapshots.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    CycleStarted {
        agent_id: String,
        cycle_id: String,
        provider: String,
        model: String,
    },
    CycleFinished {
        agent_id: String,
        cycle_id: String,
        success: bool,
        latency_ms: u64,
        tool_calls: usize,
    },
    ToolDispatched {
        agent_id: String,
        cycle_id: String,
        tool_name: String,
        call_id: String,
    },
    KeyQuarantined {
        provider: String,
        key_fingerprint: String,
        duration_secs: u64,
        reason: String,
    },
    ModelFailover {
        agent_id: String,
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        attempt: u32,
        reason: String,
    },
    AgentCreated {
        agent_id: String,
        persona: String,
        provider: String,
        model: String,
        team: Option<String>,
    },
    AgentDeleted {
        agent_id: String,
    },
    TeamCreated {
        team_id: String,
    },
    TeamDeleted {
        team_id: String,
    },
    SessionSaved {
        project: String,
        session: String,
        agent_count: usize,
    },
    SessionLoaded {
        project: String,
        session: String,
        agent_count: usize,
    },
    AgentOverrideRequired {
        agent_id: String,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sa_event");
    }
}
