use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The provider-agnostic event contract every [`crate::provider::LlmProvider`]
/// adapter must emit. Tool calls are not represented here: this system's
/// tools are invoked via XML embedded in assistant text (see the `tool`
/// module), not via a provider's native tool-calling wire format, so the
/// stream carries only raw text deltas.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text delta chunk.
    #[serde(rename = "delta")]
    Delta { text: String },

    /// Stream finished normally. Never follows an `Error` event.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    /// Stream terminated with an error. `retryable` distinguishes transport
    /// failures (worth an in-cycle retry) from semantic failures (invalid
    /// model, malformed request) that must cascade straight to failover.
    #[serde(rename = "error")]
    Error {
        kind: ErrorKind,
        retryable: bool,
        detail: String,
    },
}

/// LLM stream error classification, used to select the recovery policy in
/// the cycle handler's failure step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    RateLimited,
    AuthFailed,
    ModelUnavailable,
    InvalidRequest,
    ProviderInternal,
}

impl ErrorKind {
    /// Whether this kind is, by default, worth retrying with the same
    /// key/model before escalating (transport/internal hiccups only).
    pub fn default_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientNetwork | ErrorKind::ProviderInternal)
    }
}

/// Token usage for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
