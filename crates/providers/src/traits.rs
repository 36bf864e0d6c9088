//! The streaming chat contract every LLM adapter implements (spec §4.4, §6).

use sa_domain::error::Result;
use sa_domain::message::Message;
use sa_domain::stream::{BoxStream, StreamEvent};
use tokio_util::sync::CancellationToken;

/// A provider-agnostic streaming chat request. Tool calls are not part of
/// the wire contract here: this system's tools are invoked via XML embedded
/// in assistant text (see `sa-tools`), not a provider's native tool-calling
/// format, so the request carries only messages and sampling parameters.
///
/// `api_key` is resolved by the caller (the cycle handler, via
/// `sa_providers::keys::ProviderKeyManager`) and passed in per call rather
/// than held by the adapter, since keys rotate independently of which
/// adapter instance is in use.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub api_key: String,
    pub extras: std::collections::BTreeMap<String, String>,
}

/// Trait every LLM transport adapter implements (spec §4.4).
///
/// `stream` must: (a) respect `cancel`, stopping generation promptly when
/// cancelled; (b) distinguish retryable transport errors from non-retryable
/// semantic errors via [`sa_domain::stream::ErrorKind`]; (c) never emit
/// `Done` after an `Error` has been yielded.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// A unique identifier for this provider instance (matches the
    /// `provider` field of the `AgentConfig`s it serves).
    fn provider_id(&self) -> &str;

    async fn stream(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}
