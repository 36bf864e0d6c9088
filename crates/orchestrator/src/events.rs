//! UI Gateway event contract (spec §4.13, §6): the server→client events a
//! cycle emits as it runs. Kept as a trait so `CycleHandler` never depends
//! on the concrete transport — tests use a recording sink, the real binary
//! wires `UiGateway`.

use sa_domain::agent::AgentState;
use sa_domain::message::Message;

pub trait EventSink: Send + Sync {
    fn agent_status(&self, agent_id: &str, state: AgentState);
    fn content_chunk(&self, agent_id: &str, text: &str);
    fn message_appended(&self, agent_id: &str, message: &Message);
    fn tool_result(&self, agent_id: &str, call_id: &str, content: &str);
    fn error(&self, agent_id: &str, detail: &str);
    fn override_required(&self, agent_id: &str, reason: &str);
}

/// A sink that drops every event; useful for headless runs and as the
/// default before a real gateway is wired in.
pub struct NullSink;

impl EventSink for NullSink {
    fn agent_status(&self, _agent_id: &str, _state: AgentState) {}
    fn content_chunk(&self, _agent_id: &str, _text: &str) {}
    fn message_appended(&self, _agent_id: &str, _message: &Message) {}
    fn tool_result(&self, _agent_id: &str, _call_id: &str, _content: &str) {}
    fn error(&self, _agent_id: &str, _detail: &str) {}
    fn override_required(&self, _agent_id: &str, _reason: &str) {}
}
