//! Error types for the voice-dialog session.

/// Top-level error type for the telephony dialog orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Streaming recognizer error (protocol, transport).
    #[error("STT error: {0}")]
    Stt(String),

    /// Recognizer session could not be established in time.
    #[error("STT connect error: {0}")]
    SttConnect(String),

    /// Language model backend error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio codec or decode error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Invalid or incomplete configuration, detected before the call begins.
    #[error("config error: {0}")]
    Config(String),

    /// Turn-taking / conversation state error.
    #[error("conversation error: {0}")]
    Conversation(String),

    /// Channel send/receive error between session tasks.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this error is a transient transport condition that the
    /// owning component recovers from locally (reconnect, fallback).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Stt(_) | Self::Llm(_) | Self::Tts(_) | Self::Io(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;
