//! The one concrete streaming adapter this implementation ships (spec §4.4):
//! an OpenAI-compatible chat-completions client, the shape shared by
//! OpenRouter, OpenAI, Ollama, and local inference servers (vLLM, LM
//! Studio, ...). It proves the `LlmProvider` contract without committing to
//! vendor-specific code for every backend.

use crate::sse::sse_response_stream;
use crate::traits::{ChatRequest, LlmProvider};
use sa_domain::error::{Error, Result};
use sa_domain::message::{Message, Role};
use sa_domain::stream::{BoxStream, ErrorKind, StreamEvent, Usage};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// An LLM provider adapter for any OpenAI-compatible chat-completions
/// endpoint. `base_url` already includes the `/v1`-style prefix; this
/// adapter appends `/chat/completions`.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "temperature": req.temperature,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        for (k, v) in &req.extras {
            body[k] = Value::String(v.clone());
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn stream(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);

        let send_fut = self
            .client
            .post(&url)
            .bearer_auth(&req.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Other("request cancelled before dispatch".into()));
            }
            result = send_fut => result.map_err(from_reqwest)?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            let (kind, detail) = classify_http_error(status, &body_text);
            let retryable = !matches!(kind, ErrorKind::InvalidRequest | ErrorKind::ModelUnavailable);
            let single = futures_util::stream::once(async move {
                Ok(StreamEvent::Error {
                    kind,
                    retryable,
                    detail,
                })
            });
            return Ok(Box::pin(single));
        }

        let inner = sse_response_stream(response, parse_sse_data);
        Ok(Box::pin(cancellable(inner, cancel)))
    }
}

/// Wrap a stream so it stops yielding once `cancel` fires, matching the
/// "never emit Done after Error"/cancellation contract of spec §4.4 and §5.
fn cancellable(
    inner: BoxStream<'static, Result<StreamEvent>>,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<StreamEvent>> {
    Box::pin(async_stream::stream! {
        tokio::pin!(inner);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = futures_util::StreamExt::next(&mut inner) => {
                    match next {
                        Some(item) => yield item,
                        None => break,
                    }
                }
            }
        }
    })
}

fn classify_http_error(status: reqwest::StatusCode, body: &str) -> (ErrorKind, String) {
    let detail = sa_domain::secret::mask_secrets(&body.chars().take(500).collect::<String>());
    let kind = match status.as_u16() {
        401 | 403 => ErrorKind::AuthFailed,
        429 => ErrorKind::RateLimited,
        404 | 400 => ErrorKind::InvalidRequest,
        500..=599 => ErrorKind::ProviderInternal,
        _ => ErrorKind::TransientNetwork,
    };
    (kind, format!("HTTP {status}: {detail}"))
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    let mut v = serde_json::json!({
        "role": role_to_str(msg.role),
        "content": msg.content,
    });
    if let Some(id) = &msg.tool_call_id {
        v["tool_call_id"] = Value::String(id.clone());
    }
    if let Some(name) = &msg.name {
        v["name"] = Value::String(name.clone());
    }
    v
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

/// Parse one SSE `data:` payload into zero or more stream events.
fn parse_sse_data(data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    let choice = match choice {
        Some(c) => c,
        None => {
            // Usage-only trailer chunk (stream_options.include_usage).
            return match v.get("usage").and_then(parse_usage) {
                Some(usage) => vec![Ok(StreamEvent::Done {
                    usage: Some(usage),
                    finish_reason: None,
                })],
                None => Vec::new(),
            };
        }
    };

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let usage = v.get("usage").and_then(parse_usage);
        return vec![Ok(StreamEvent::Done {
            usage,
            finish_reason: Some(fr.to_string()),
        })];
    }

    let text = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str());

    match text {
        Some(t) if !t.is_empty() => vec![Ok(StreamEvent::Delta { text: t.to_string() })],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delta_chunk() {
        let data = r#"{"choices":[{"delta":{"content":"hi"},"index":0}]}"#;
        let events = parse_sse_data(data);
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            StreamEvent::Delta { text } => assert_eq!(text, "hi"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_done_chunk_with_finish_reason() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let events = parse_sse_data(data);
        match events[0].as_ref().unwrap() {
            StreamEvent::Done { finish_reason, .. } => {
                assert_eq!(finish_reason.as_deref(), Some("stop"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_yields_nothing() {
        assert!(parse_sse_data("[DONE]").is_empty());
    }

    #[test]
    fn classifies_rate_limit_as_quota_error() {
        let (kind, _) = classify_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(kind, ErrorKind::RateLimited);
    }

    #[test]
    fn classifies_auth_failure() {
        let (kind, _) = classify_http_error(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert_eq!(kind, ErrorKind::AuthFailed);
    }
}
