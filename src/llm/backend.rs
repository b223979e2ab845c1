//! Completion backends and the primary/secondary fallback seam.
//!
//! A [`ChatBackend`] turns one request into a stream of [`ChatEvent`]s.
//! Streaming and non-streaming completions are the same operation: the
//! non-streaming path just yields one `Token` before `End`. The
//! [`FallbackBackend`] retries a failed request exactly once against the
//! secondary endpoint and never loops.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tracing::warn;

use crate::config::LlmEndpoint;
use crate::error::{Result, SessionError};
use crate::llm::message::{Message, Role};
use crate::llm::sse::SseDecoder;
use crate::llm::tools::ToolSpec;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of the reply.
    Stop,
    /// Token cap reached.
    Length,
    /// The model wants a tool invoked.
    ToolCalls,
    /// Safety filter intervened.
    ContentFilter,
    /// Anything else the backend reports.
    Other,
}

impl FinishReason {
    fn parse(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            _ => Self::Other,
        }
    }
}

/// One event in a completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A text fragment of the assistant reply.
    Token {
        /// The decoded fragment.
        delta: String,
    },
    /// An incremental piece of a streamed tool call.
    ToolCallChunk {
        /// Call identifier, when this chunk carries it.
        id: Option<String>,
        /// Function name, when this chunk carries it.
        name: Option<String>,
        /// Fragment of the JSON argument string.
        args_fragment: Option<String>,
    },
    /// Token accounting reported by the backend.
    Usage {
        /// Prompt tokens consumed.
        input_tokens: u64,
        /// Completion tokens produced.
        output_tokens: u64,
    },
    /// Terminal event of a successful stream.
    End {
        /// Why generation stopped.
        finish_reason: FinishReason,
    },
    /// Terminal event of a broken stream.
    StreamError {
        /// What went wrong mid-stream.
        message: String,
    },
}

/// A stream of completion events.
pub type ChatStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// One completion request. History is copied in, never shared.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation history, system message first.
    pub messages: Vec<Message>,
    /// Tools offered to the model.
    pub tools: Vec<ToolSpec>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Ask for a token stream rather than a single body.
    pub stream: bool,
}

/// A completion backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &str;

    /// Dispatch one request and return its event stream.
    async fn send(&self, request: &ChatRequest) -> Result<ChatStream>;
}

// ── HTTP chat-completions backend ─────────────────────────────

/// Chat-completions backend over HTTP with SSE streaming.
pub struct HttpBackend {
    endpoint: LlmEndpoint,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.endpoint.base_url)
            .field("model", &self.endpoint.model)
            .finish()
    }
}

impl HttpBackend {
    /// Create a backend for the given endpoint.
    pub fn new(endpoint: LlmEndpoint) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.endpoint.model,
            "messages": messages_to_wire(&request.messages),
            "stream": request.stream,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if let Some(obj) = body.as_object_mut() {
            if request.stream {
                obj.insert(
                    "stream_options".into(),
                    serde_json::json!({"include_usage": true}),
                );
            }
            if !request.tools.is_empty() {
                let tools: Vec<serde_json::Value> = request
                    .tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect();
                obj.insert("tools".into(), serde_json::json!(tools));
            }
        }
        body
    }
}

/// Convert history messages to the chat-completions wire shape.
fn messages_to_wire(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::Tool => serde_json::json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id.as_deref().unwrap_or_default(),
                "name": msg.tool_name.as_deref().unwrap_or_default(),
                "content": msg.content,
            }),
            role => serde_json::json!({
                "role": role.to_string(),
                "content": msg.content,
            }),
        })
        .collect()
}

/// Parse one streamed chat-completions chunk into events.
///
/// Malformed JSON yields no events; partial chunks are expected mid-stream.
fn parse_stream_chunk(data: &str) -> Vec<ChatEvent> {
    let parsed: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };

    let mut events = Vec::new();

    if let Some(usage) = parsed.get("usage")
        && usage.is_object()
    {
        events.push(ChatEvent::Usage {
            input_tokens: usage
                .get("prompt_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0),
            output_tokens: usage
                .get("completion_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0),
        });
    }

    let Some(choices) = parsed.get("choices").and_then(|c| c.as_array()) else {
        return events;
    };
    for choice in choices {
        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(|c| c.as_str())
                && !content.is_empty()
            {
                events.push(ChatEvent::Token {
                    delta: content.to_owned(),
                });
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(|tc| tc.as_array()) {
                for tc in tool_calls {
                    let function = tc.get("function");
                    events.push(ChatEvent::ToolCallChunk {
                        id: tc
                            .get("id")
                            .and_then(|i| i.as_str())
                            .map(str::to_owned),
                        name: function
                            .and_then(|f| f.get("name"))
                            .and_then(|n| n.as_str())
                            .map(str::to_owned),
                        args_fragment: function
                            .and_then(|f| f.get("arguments"))
                            .and_then(|a| a.as_str())
                            .map(str::to_owned),
                    });
                }
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
            events.push(ChatEvent::End {
                finish_reason: FinishReason::parse(reason),
            });
        }
    }
    events
}

/// Turn a complete (non-streaming) response body into the same event shape.
fn parse_full_body(parsed: &serde_json::Value) -> Vec<ChatEvent> {
    let mut events = Vec::new();

    if let Some(usage) = parsed.get("usage") {
        events.push(ChatEvent::Usage {
            input_tokens: usage
                .get("prompt_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0),
            output_tokens: usage
                .get("completion_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0),
        });
    }

    let choice = parsed.get("choices").and_then(|c| c.get(0));
    let message = choice.and_then(|c| c.get("message"));
    if let Some(content) = message
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        && !content.is_empty()
    {
        events.push(ChatEvent::Token {
            delta: content.to_owned(),
        });
    }
    if let Some(tool_calls) = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(|tc| tc.as_array())
    {
        for tc in tool_calls {
            let function = tc.get("function");
            events.push(ChatEvent::ToolCallChunk {
                id: tc.get("id").and_then(|i| i.as_str()).map(str::to_owned),
                name: function
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
                    .map(str::to_owned),
                args_fragment: function
                    .and_then(|f| f.get("arguments"))
                    .and_then(|a| a.as_str())
                    .map(str::to_owned),
            });
        }
    }

    let reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(|r| r.as_str())
        .unwrap_or("stop");
    events.push(ChatEvent::End {
        finish_reason: FinishReason::parse(reason),
    });
    events
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.endpoint.model
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatStream> {
        let url = format!(
            "{}/v1/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        );
        let mut http = self.client.post(&url).json(&self.build_body(request));
        if !self.endpoint.api_key.is_empty() {
            http = http.bearer_auth(&self.endpoint.api_key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| SessionError::Llm(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Llm(format!(
                "HTTP {}: {}",
                status.as_u16(),
                extract_error_message(&body)
            )));
        }

        if !request.stream {
            let parsed: serde_json::Value = response
                .json()
                .await
                .map_err(|e| SessionError::Llm(format!("invalid response body: {e}")))?;
            let events = parse_full_body(&parsed);
            return Ok(Box::pin(futures_util::stream::iter(events)));
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut ended = false;
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for frame in decoder.feed(&chunk) {
                            if frame.is_done() {
                                continue;
                            }
                            for event in parse_stream_chunk(&frame.data) {
                                ended |= matches!(event, ChatEvent::End { .. });
                                yield event;
                            }
                        }
                    }
                    Err(e) => {
                        yield ChatEvent::StreamError {
                            message: format!("stream read failed: {e}"),
                        };
                        return;
                    }
                }
            }
            if let Some(frame) = decoder.finish()
                && !frame.is_done()
            {
                for event in parse_stream_chunk(&frame.data) {
                    ended |= matches!(event, ChatEvent::End { .. });
                    yield event;
                }
            }
            // A backend that closes without finish_reason still terminates.
            if !ended {
                yield ChatEvent::End {
                    finish_reason: FinishReason::Stop,
                };
            }
        };
        Ok(Box::pin(stream))
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

// ── primary / secondary fallback ──────────────────────────────

/// Backend pair with a single-shot secondary retry.
///
/// Exactly one attempt per backend per request: a primary failure of any
/// kind (non-2xx or I/O) forwards the same request to the secondary once,
/// and a secondary failure surfaces.
pub struct FallbackBackend {
    primary: Box<dyn ChatBackend>,
    secondary: Option<Box<dyn ChatBackend>>,
}

impl FallbackBackend {
    /// Create the pair; `secondary` may be absent.
    pub fn new(primary: Box<dyn ChatBackend>, secondary: Option<Box<dyn ChatBackend>>) -> Self {
        Self { primary, secondary }
    }
}

impl std::fmt::Debug for FallbackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackBackend")
            .field("primary", &self.primary.name())
            .field(
                "secondary",
                &self.secondary.as_ref().map(|s| s.name().to_owned()),
            )
            .finish()
    }
}

#[async_trait]
impl ChatBackend for FallbackBackend {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatStream> {
        match self.primary.send(request).await {
            Ok(stream) => Ok(stream),
            Err(primary_err) => match &self.secondary {
                Some(secondary) => {
                    warn!(
                        primary = self.primary.name(),
                        secondary = secondary.name(),
                        error = %primary_err,
                        "primary completion backend failed, trying secondary"
                    );
                    secondary.send(request).await
                }
                None => Err(primary_err),
            },
        }
    }
}
