//! Shared types for the orchestration core: agents, teams, messages, tool
//! calls, streaming events, trace events, and the crate-wide error type.

pub mod agent;
pub mod error;
pub mod message;
pub mod secret;
pub mod stream;
pub mod trace;

pub use agent::{Agent, AgentConfig, AgentState, Team};
pub use error::{Error, Result};
pub use message::{ArgValue, Message, Role, ToolCall};
pub use stream::{ErrorKind, StreamEvent, Usage};
