//! Orchestration runtime: Admin AI-coordinated ephemeral agents (spec
//! overview). Wires together `sa-domain`, `sa-providers`, `sa-tools`,
//! `sa-state`, `sa-sessions`, and `sa-prompts` into one running system.

pub mod config;
pub mod cycle;
pub mod events;
pub mod gateway;
pub mod interaction;
pub mod lifecycle;
pub mod orchestrator;

pub use config::Config;
pub use cycle::{CycleHandler, CycleOutcome, CycleResult};
pub use events::{EventSink, NullSink};
pub use gateway::{GatewayEvent, IngressEvent, UiGateway};
pub use interaction::{Action, AgentSummary, InteractionHandler, InteractionOutcome};
pub use lifecycle::{AgentLifecycle, CreateAgentSpec};
pub use orchestrator::Orchestrator;
