//! Parlance: real-time telephony voice-dialog orchestration.
//!
//! This crate drives one phone call through a full speech-in/speech-out
//! loop: streaming speech recognition, language-model turn generation with
//! tool calls, and streaming synthesis, under strict barge-in, keepalive
//! and reconnect guarantees.
//!
//! # Architecture
//!
//! A per-call [`SessionOrchestrator`] composes four components joined by
//! one-way channels (components → events → session → commands → components):
//! - **STT client**: persistent WebSocket to the recognizer, with keepalive
//!   and linear-backoff reconnection
//! - **LLM client**: chat-completions over HTTP/SSE with a single-shot
//!   secondary fallback and a windowed conversation history
//! - **TTS client**: streaming synthesis with request-id scoped
//!   cancellation and internal codec bridging (µ-law pass-through, PCM,
//!   MP3 decode)
//! - **Conversation manager**: the turn-taking state machine enforcing
//!   barge-in and the silence timeout

pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod session;
pub mod stt;
pub mod tts;

pub use config::AgentConfig;
pub use conversation::{ConversationManager, EndReason, TurnState};
pub use error::{Result, SessionError};
pub use session::SessionOrchestrator;
pub use session::events::SessionEvent;
pub use session::metrics::{CostBreakdown, CostMetrics, MetricsSnapshot};
