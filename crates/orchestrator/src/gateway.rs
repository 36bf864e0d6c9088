//! UI Gateway (C13, spec §4.13): pushes orchestration events to every
//! connected client and accepts `user_message` / `user_override` /
//! `session_command` ingress. Non-blocking push: each client has its own
//! bounded queue (depth 256); a slow client has events dropped rather than
//! stalling the orchestrator.

use crate::events::EventSink;
use sa_domain::agent::AgentState;
use sa_domain::message::Message;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub const CLIENT_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum GatewayEvent {
    AgentStatus { agent_id: String, state: AgentState },
    ContentChunk { agent_id: String, text: String },
    MessageAppended { agent_id: String, message: Message },
    ToolResult { agent_id: String, call_id: String, content: String },
    Error { agent_id: String, detail: String },
    OverrideRequired { agent_id: String, reason: String },
}

/// User→server ingress events the gateway receives (spec §6 "process-wide
/// control surface").
#[derive(Debug, Clone)]
pub enum IngressEvent {
    UserMessage { content: String },
    UserOverride {
        agent_id: String,
        new_provider: String,
        new_model: String,
    },
    LoadSession { project: String, session: String },
    SaveSession { project: String, session: String },
}

struct Client {
    id: u64,
    sender: mpsc::Sender<GatewayEvent>,
}

pub struct UiGateway {
    clients: parking_lot::Mutex<Vec<Client>>,
    next_client_id: AtomicU64,
    dropped: AtomicU64,
}

impl Default for UiGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl UiGateway {
    pub fn new() -> Self {
        Self {
            clients: parking_lot::Mutex::new(Vec::new()),
            next_client_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new client; returns its id (for `unsubscribe`) and the
    /// receiving half of its bounded event queue.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<GatewayEvent>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().push(Client { id, sender: tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, client_id: u64) {
        self.clients.lock().retain(|c| c.id != client_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Events dropped so far due to a full client queue (slow-consumer
    /// counter, exposed for diagnostics/metrics).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Non-blocking broadcast to every connected client; a client whose
    /// queue is full has this event dropped rather than stalling the
    /// caller (spec §4.13 "drop-on-slow-consumer").
    pub fn send(&self, event: GatewayEvent) {
        let clients = self.clients.lock();
        for client in clients.iter() {
            if client.sender.try_send(event.clone()).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl EventSink for UiGateway {
    fn agent_status(&self, agent_id: &str, state: AgentState) {
        self.send(GatewayEvent::AgentStatus {
            agent_id: agent_id.to_string(),
            state,
        });
    }

    fn content_chunk(&self, agent_id: &str, text: &str) {
        self.send(GatewayEvent::ContentChunk {
            agent_id: agent_id.to_string(),
            text: text.to_string(),
        });
    }

    fn message_appended(&self, agent_id: &str, message: &Message) {
        self.send(GatewayEvent::MessageAppended {
            agent_id: agent_id.to_string(),
            message: message.clone(),
        });
    }

    fn tool_result(&self, agent_id: &str, call_id: &str, content: &str) {
        self.send(GatewayEvent::ToolResult {
            agent_id: agent_id.to_string(),
            call_id: call_id.to_string(),
            content: content.to_string(),
        });
    }

    fn error(&self, agent_id: &str, detail: &str) {
        self.send(GatewayEvent::Error {
            agent_id: agent_id.to_string(),
            detail: detail.to_string(),
        });
    }

    fn override_required(&self, agent_id: &str, reason: &str) {
        self.send(GatewayEvent::OverrideRequired {
            agent_id: agent_id.to_string(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribed_client_receives_broadcast_events() {
        let gateway = UiGateway::new();
        let (_id, mut rx) = gateway.subscribe();
        gateway.agent_status("a1", AgentState::Idle);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, GatewayEvent::AgentStatus { .. }));
    }

    #[tokio::test]
    async fn unsubscribed_client_stops_receiving() {
        let gateway = UiGateway::new();
        let (id, mut rx) = gateway.subscribe();
        gateway.unsubscribe(id);
        gateway.agent_status("a1", AgentState::Idle);
        assert!(rx.try_recv().is_err());
        assert_eq!(gateway.client_count(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_rather_than_blocks() {
        let gateway = UiGateway::new();
        let (_id, _rx) = gateway.subscribe();
        for _ in 0..(CLIENT_QUEUE_DEPTH + 10) {
            gateway.content_chunk("a1", "x");
        }
        assert!(gateway.dropped_count() > 0);
    }

    #[tokio::test]
    async fn broadcasts_reach_every_client() {
        let gateway = UiGateway::new();
        let (_id1, mut rx1) = gateway.subscribe();
        let (_id2, mut rx2) = gateway.subscribe();
        gateway.error("a1", "boom");
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
