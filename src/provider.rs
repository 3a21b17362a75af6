//! The `LlmProvider` trait and its one reference adapter.
//!
//! Grounded on the teacher's `core/provider.rs` (`LlmProvider`,
//! `StreamingChunk`, `LlmStream`) and `agent/client.rs` (`OpenRouterClient`'s
//! reqwest usage, rate-limit bookkeeping), generalized: `llmist` ships no
//! vendor-specific wire format, only a generic OpenAI-compatible
//! streaming chat-completions client used by the example binary and
//! integration tests. Vendor SDKs are out of scope; this is the seam they
//! would plug into.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::message::{Message, Role};
use crate::tree::Usage;

/// One chunk of a streaming completion: a text delta, and — on the final
/// chunk — the finish reason and usage totals.
#[derive(Debug, Clone, Default)]
pub struct StreamingChunk {
    pub delta: Option<String>,
    pub is_final: bool,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamingChunk>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn default_model(&self) -> &str;

    /// Streams a chat completion for `messages` against `model`. Providers
    /// surface auth/rate-limit/stream failures as `Error::LlmAuth`,
    /// `Error::LlmRateLimited`, or `Error::LlmStreamError` respectively, so
    /// the agent loop's single-retry policy can key off `is_retryable()`.
    async fn generate_stream(&self, messages: &[Message], model: &str) -> Result<LlmStream>;
}

#[derive(Debug, Default)]
struct RateLimitState {
    retry_after: Option<std::time::Instant>,
}

/// A generic OpenAI-compatible streaming chat-completions client. Not a
/// vendor adapter: it speaks the common `/chat/completions` SSE shape that
/// many providers expose, with no per-vendor quirks.
pub struct HttpChatProvider {
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    api_key: Option<SecretString>,
    rate_limit: Arc<RwLock<RateLimitState>>,
}

impl HttpChatProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url,
            default_model: config.default_model,
            api_key: config.api_key,
            rate_limit: Arc::new(RwLock::new(RateLimitState::default())),
        })
    }

    async fn should_wait(&self) -> Option<std::time::Duration> {
        let state = self.rate_limit.read().await;
        state
            .retry_after
            .map(|at| at.saturating_duration_since(std::time::Instant::now()))
            .filter(|d| !d.is_zero())
    }
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<UsageWire>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: MessageDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct MessageDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageWire {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[async_trait]
impl LlmProvider for HttpChatProvider {
    fn id(&self) -> &str {
        "http-chat"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn generate_stream(&self, messages: &[Message], model: &str) -> Result<LlmStream> {
        if let Some(wait) = self.should_wait().await {
            tokio::time::sleep(wait).await;
        }

        let wire_messages: Vec<_> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": wire_role(m.role),
                    "content": m.content.as_text(),
                })
            })
            .collect();

        let mut request = self.client.post(format!("{}/chat/completions", self.base_url)).json(&json!({
            "model": model,
            "messages": wire_messages,
            "stream": true,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::LlmStreamError(e.to_string())
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::LlmAuth(format!("HTTP {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let mut state = self.rate_limit.write().await;
            state.retry_after = Some(std::time::Instant::now() + std::time::Duration::from_secs(5));
            return Err(Error::LlmRateLimited(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::LlmStreamError(format!("HTTP {status}: {body}")));
        }

        let byte_stream = response.bytes_stream();
        let parsed = stream::unfold(
            (byte_stream, Vec::<u8>::new()),
            |(mut byte_stream, mut buffer)| async move {
                loop {
                    if let Some(pos) = find_double_newline(&buffer) {
                        let event: Vec<u8> = buffer.drain(..pos + 2).collect();
                        if let Some(chunk) = parse_sse_event(&event) {
                            return Some((chunk, (byte_stream, buffer)));
                        }
                        continue;
                    }
                    match byte_stream.next().await {
                        Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                        Some(Err(e)) => {
                            return Some((Err(Error::LlmStreamError(e.to_string())), (byte_stream, buffer)))
                        }
                        None => {
                            if buffer.is_empty() {
                                return None;
                            }
                            let event = std::mem::take(&mut buffer);
                            if let Some(chunk) = parse_sse_event(&event) {
                                return Some((chunk, (byte_stream, buffer)));
                            }
                            return None;
                        }
                    }
                }
            },
        )
        .filter_map(|item| async move { item });

        Ok(Box::pin(parsed))
    }
}

fn find_double_newline(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Parses one `data: ...` SSE event into a [`StreamingChunk`], returning
/// `None` for blank lines, comments, or an unparsable payload (skipped
/// rather than surfaced as a stream error, matching permissive SSE clients).
fn parse_sse_event(event: &[u8]) -> Option<Result<StreamingChunk>> {
    let text = std::str::from_utf8(event).ok()?;
    for line in text.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Some(Ok(StreamingChunk {
                is_final: true,
                ..Default::default()
            }));
        }
        let parsed: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => return Some(Err(Error::Json(e))),
        };
        let choice = parsed.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let delta = choice.and_then(|c| c.delta.content);
        let usage = parsed.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        let is_final = finish_reason.is_some();
        return Some(Ok(StreamingChunk {
            delta,
            is_final,
            finish_reason,
            usage,
        }));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            base_url,
            default_model: "test-model".to_string(),
            api_key: None,
            request_timeout: std::time::Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn streams_text_deltas_from_sse_body() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2,\"total_tokens\":3}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let provider = HttpChatProvider::new(config(server.uri())).unwrap();
        let messages = vec![Message::user("hi")];
        let mut stream = provider.generate_stream(&messages, "test-model").await.unwrap();

        let mut collected = String::new();
        let mut saw_final = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if let Some(delta) = chunk.delta {
                collected.push_str(&delta);
            }
            if chunk.finish_reason.is_some() {
                saw_final = true;
            }
        }
        assert_eq!(collected, "Hello");
        assert!(saw_final);
    }

    #[tokio::test]
    async fn surfaces_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = HttpChatProvider::new(config(server.uri())).unwrap();
        let messages = vec![Message::user("hi")];
        let err = provider.generate_stream(&messages, "test-model").await.unwrap_err();
        assert!(matches!(err, Error::LlmAuth(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn surfaces_rate_limit_as_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = HttpChatProvider::new(config(server.uri())).unwrap();
        let messages = vec![Message::user("hi")];
        let err = provider.generate_stream(&messages, "test-model").await.unwrap_err();
        assert!(matches!(err, Error::LlmRateLimited(_)));
        assert!(err.is_retryable());
    }
}
