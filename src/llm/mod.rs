//! Language-model client: conversation history plus turn generation.
//!
//! The client owns the session's conversation history and is its only
//! mutator; everyone else reads snapshots. Streaming and non-streaming
//! generation are one operation; the streaming variant additionally
//! forwards deltas to the caller as they arrive.

pub mod backend;
pub mod message;
pub mod sse;
pub mod tools;

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Result, SessionError};
use crate::session::metrics::{CostMetrics, estimate_tokens};
use backend::{ChatBackend, ChatEvent, ChatRequest, FallbackBackend, FinishReason, HttpBackend};
use message::{Message, Role, truncate_history};
use tools::{ToolCall, ToolCallBuilder, ToolSpec, normalize_tools};

/// A finished generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Full assistant text (empty when the turn is a tool call).
    pub content: String,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
    /// Tool invocation requested instead of (or alongside) text.
    pub tool_call: Option<ToolCall>,
}

struct LlmState {
    history: Vec<Message>,
    tools: Vec<ToolSpec>,
    in_flight: Option<CancellationToken>,
}

/// Client for the completion backends. Cheap to clone; all clones share
/// one history.
#[derive(Clone)]
pub struct LlmClient {
    state: Arc<Mutex<LlmState>>,
    backend: Arc<dyn ChatBackend>,
    temperature: f32,
    max_tokens: u32,
    history_window: usize,
    metrics: Arc<CostMetrics>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("backend", &self.backend.name())
            .field("history_window", &self.history_window)
            .finish()
    }
}

impl LlmClient {
    /// Build a client from config, wiring the primary/secondary pair.
    ///
    /// # Errors
    ///
    /// Returns a config error when the primary endpoint is unusable.
    pub fn new(config: &LlmConfig, metrics: Arc<CostMetrics>) -> Result<Self> {
        if !config.primary.is_configured() {
            return Err(SessionError::Config(
                "llm.primary endpoint is not configured".into(),
            ));
        }
        let secondary = config
            .secondary
            .as_ref()
            .filter(|endpoint| endpoint.is_configured())
            .map(|endpoint| Box::new(HttpBackend::new(endpoint.clone())) as Box<dyn ChatBackend>);
        let backend: Arc<dyn ChatBackend> = Arc::new(FallbackBackend::new(
            Box::new(HttpBackend::new(config.primary.clone())),
            secondary,
        ));
        Ok(Self::with_backend(backend, config, metrics))
    }

    /// Build a client over an explicit backend (used by tests and stubs).
    pub fn with_backend(
        backend: Arc<dyn ChatBackend>,
        config: &LlmConfig,
        metrics: Arc<CostMetrics>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(LlmState {
                history: Vec::new(),
                tools: Vec::new(),
                in_flight: None,
            })),
            backend,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            history_window: config.history_window,
            metrics,
        }
    }

    /// Install the system prompt and normalized tool set.
    ///
    /// Idempotent: reconfiguring with the same prompt leaves history
    /// unchanged apart from the pinned system message.
    pub fn configure(&self, system_prompt: &str, raw_tools: &[serde_json::Value]) {
        let mut state = self.lock();
        state.tools = normalize_tools(raw_tools);
        if system_prompt.is_empty() {
            return;
        }
        match state.history.first_mut() {
            Some(head) if head.role == Role::System => {
                head.content = system_prompt.to_owned();
            }
            _ => state.history.insert(0, Message::system(system_prompt)),
        }
    }

    /// Snapshot of the conversation history.
    pub fn history(&self) -> Vec<Message> {
        self.lock().history.clone()
    }

    /// Record an assistant turn that did not come from generation
    /// (the configured greeting).
    pub fn record_assistant(&self, content: &str) {
        let mut state = self.lock();
        state.history.push(Message::assistant(content));
        truncate_history(&mut state.history, self.history_window);
    }

    /// Append an externally resolved tool result.
    pub fn add_tool_result(&self, tool_name: &str, call_id: &str, result: &str) {
        let mut state = self.lock();
        state
            .history
            .push(Message::tool_result(tool_name, call_id, result));
        truncate_history(&mut state.history, self.history_window);
    }

    /// Abort any in-flight generation.
    pub fn cancel(&self) {
        if let Some(token) = self.lock().in_flight.take() {
            token.cancel();
        }
    }

    /// One non-streaming completion for `user_message`.
    ///
    /// Returns `None` when cancelled mid-flight.
    ///
    /// # Errors
    ///
    /// Surfaces backend errors after the single secondary fallback.
    pub async fn generate(&self, user_message: &str) -> Result<Option<Completion>> {
        self.run(Some(user_message), false, None).await
    }

    /// Streaming completion; deltas are forwarded to `token_tx` as they
    /// arrive and the terminal value is returned.
    ///
    /// Returns `None` when cancelled mid-flight.
    ///
    /// # Errors
    ///
    /// Surfaces backend errors after the single secondary fallback.
    pub async fn generate_streaming(
        &self,
        user_message: &str,
        token_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Option<Completion>> {
        self.run(Some(user_message), true, Some(token_tx)).await
    }

    /// Follow-up generation after a tool result, with no new user message.
    ///
    /// Returns `None` when cancelled mid-flight.
    ///
    /// # Errors
    ///
    /// Surfaces backend errors after the single secondary fallback.
    pub async fn continue_streaming(
        &self,
        token_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Option<Completion>> {
        self.run(None, true, Some(token_tx)).await
    }

    async fn run(
        &self,
        user_message: Option<&str>,
        stream: bool,
        token_tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<Option<Completion>> {
        let cancel = CancellationToken::new();
        let request = {
            let mut state = self.lock();
            if let Some(text) = user_message {
                state.history.push(Message::user(text));
                truncate_history(&mut state.history, self.history_window);
            }
            state.in_flight = Some(cancel.clone());
            ChatRequest {
                messages: state.history.clone(),
                tools: state.tools.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                stream,
            }
        };
        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                debug!("generation cancelled before dispatch completed");
                Ok(None)
            }
            result = self.drive(&request, token_tx, &cancel) => result,
        };
        self.lock().in_flight = None;

        match outcome? {
            None => Ok(None),
            Some(completion) => {
                if completion.tool_call.is_none() && !completion.content.is_empty() {
                    let mut state = self.lock();
                    state.history.push(Message::assistant(&completion.content));
                    truncate_history(&mut state.history, self.history_window);
                }
                Ok(Some(completion))
            }
        }
    }

    async fn drive(
        &self,
        request: &ChatRequest,
        token_tx: Option<mpsc::UnboundedSender<String>>,
        cancel: &CancellationToken,
    ) -> Result<Option<Completion>> {
        let mut events = self.backend.send(request).await?;

        let mut content = String::new();
        let mut finish_reason = FinishReason::Stop;
        let mut builder = ToolCallBuilder::new();
        let mut reported_usage: Option<(u64, u64)> = None;

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("generation cancelled mid-stream");
                    return Ok(None);
                }
                event = events.next() => event,
            };
            let Some(event) = event else { break };
            match event {
                ChatEvent::Token { delta } => {
                    if let Some(tx) = &token_tx {
                        let _ = tx.send(delta.clone());
                    }
                    content.push_str(&delta);
                }
                ChatEvent::ToolCallChunk {
                    id,
                    name,
                    args_fragment,
                } => {
                    builder.push(id.as_deref(), name.as_deref(), args_fragment.as_deref());
                }
                ChatEvent::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    reported_usage = Some((input_tokens, output_tokens));
                }
                ChatEvent::End { finish_reason: fr } => {
                    finish_reason = fr;
                }
                ChatEvent::StreamError { message } => {
                    warn!("completion stream broke: {message}");
                    return Err(SessionError::Llm(message));
                }
            }
        }

        // Backends that omit usage still get billed, by estimate.
        let (input_tokens, output_tokens) = reported_usage.unwrap_or_else(|| {
            (
                estimate_tokens(prompt_chars(&request.messages)),
                estimate_tokens(content.len() as u64),
            )
        });
        self.metrics.add_llm_tokens(input_tokens, output_tokens);

        Ok(Some(Completion {
            tool_call: builder.finish(),
            content,
            finish_reason,
        }))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LlmState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Character count of the outbound prompt, for token estimation when the
/// backend omits usage.
fn prompt_chars(messages: &[Message]) -> u64 {
    messages.iter().map(|m| m.content.len() as u64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use backend::ChatStream;

    struct ScriptedBackend {
        events: Vec<ChatEvent>,
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _request: &ChatRequest) -> Result<ChatStream> {
            Ok(Box::pin(futures_util::stream::iter(self.events.clone())))
        }
    }

    fn client(events: Vec<ChatEvent>) -> LlmClient {
        LlmClient::with_backend(
            Arc::new(ScriptedBackend { events }),
            &LlmConfig::default(),
            Arc::new(CostMetrics::default()),
        )
    }

    fn text_turn(text: &str) -> Vec<ChatEvent> {
        vec![
            ChatEvent::Token {
                delta: text.to_owned(),
            },
            ChatEvent::End {
                finish_reason: FinishReason::Stop,
            },
        ]
    }

    #[tokio::test]
    async fn generate_appends_user_and_assistant() {
        let client = client(text_turn("It is three in the afternoon."));
        client.configure("You are a clock.", &[]);
        let completion = client.generate("What time is it?").await;
        match completion {
            Ok(Some(c)) => assert_eq!(c.content, "It is three in the afternoon."),
            _ => unreachable!("generation succeeds"),
        }
        let history = client.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1].content, "What time is it?");
        assert_eq!(history[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn streaming_forwards_deltas() {
        let client = client(vec![
            ChatEvent::Token { delta: "It ".into() },
            ChatEvent::Token {
                delta: "is late.".into(),
            },
            ChatEvent::End {
                finish_reason: FinishReason::Stop,
            },
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let completion = client.generate_streaming("hello", tx).await;
        assert_eq!(
            completion.ok().flatten().map(|c| c.content),
            Some("It is late.".to_owned())
        );
        assert_eq!(rx.recv().await.as_deref(), Some("It "));
        assert_eq!(rx.recv().await.as_deref(), Some("is late."));
    }

    #[tokio::test]
    async fn tool_call_skips_assistant_append() {
        let client = client(vec![
            ChatEvent::ToolCallChunk {
                id: Some("call_1".into()),
                name: Some("get_weather".into()),
                args_fragment: Some(r#"{"city":"Karachi"}"#.into()),
            },
            ChatEvent::End {
                finish_reason: FinishReason::ToolCalls,
            },
        ]);
        let completion = client.generate("weather?").await;
        match completion {
            Ok(Some(c)) => {
                let call = c.tool_call.expect("tool call present");
                assert_eq!(call.name, "get_weather");
                assert_eq!(call.arguments, r#"{"city":"Karachi"}"#);
            }
            _ => unreachable!("generation succeeds"),
        }
        // User message appended, assistant NOT appended.
        let history = client.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn tool_result_then_followup() {
        let client = client(text_turn("It is 32 degrees."));
        client.add_tool_result("get_weather", "call_1", r#"{"temp":32}"#);
        let (tx, _rx) = mpsc::unbounded_channel();
        let completion = client.continue_streaming(tx).await;
        assert!(completion.ok().flatten().is_some());
        let history = client.history();
        assert_eq!(history[0].role, Role::Tool);
        assert_eq!(history[0].tool_name.as_deref(), Some("get_weather"));
    }

    #[tokio::test]
    async fn history_window_enforced() {
        let client = client(text_turn("ok"));
        client.configure("sys", &[]);
        for i in 0..30 {
            let _ = client.generate(&format!("msg {i}")).await;
        }
        let history = client.history();
        assert!(history.len() <= 21);
        assert_eq!(history[0].role, Role::System);
        let system_count = history.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(system_count, 1);
    }

    #[tokio::test]
    async fn configure_is_idempotent() {
        let client = client(text_turn("ok"));
        client.configure("prompt A", &[]);
        let _ = client.generate("hi").await;
        let before = client.history();
        client.configure("prompt A", &[]);
        assert_eq!(client.history(), before);
    }

    #[tokio::test]
    async fn cancel_before_generate_is_noop() {
        let client = client(text_turn("ok"));
        client.cancel();
        assert!(client.generate("hi").await.ok().flatten().is_some());
    }

    #[tokio::test]
    async fn stream_error_surfaces() {
        let client = client(vec![ChatEvent::StreamError {
            message: "connection reset".into(),
        }]);
        assert!(client.generate("hi").await.is_err());
    }

    #[tokio::test]
    async fn greeting_recorded_as_assistant() {
        let client = client(Vec::new());
        client.record_assistant("Hello, how can I help?");
        let history = client.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Assistant);
    }
}
