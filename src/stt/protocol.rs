//! Recognizer wire protocol.
//!
//! The streaming recognizer speaks JSON over a WebSocket: the client sends a
//! configuration frame, then raw audio as binary frames, plus occasional
//! control messages; the server answers with token batches. Two special
//! token texts ride the stream in-band: `<end>` marks a detected endpoint
//! and `<fin>` is recognizer-internal filler that is always discarded.

use serde::{Deserialize, Serialize};

use crate::config::SttConfig;

/// In-band endpoint marker token.
pub const END_MARKER: &str = "<end>";
/// In-band filler token, discarded on receipt.
pub const FIN_MARKER: &str = "<fin>";

/// Messages sent to the recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens (or re-opens) a recognition session.
    Configure {
        /// Inbound codec label (`ulaw`, `pcm`).
        codec: String,
        /// Inbound sample rate in Hz.
        sample_rate: u32,
        /// Channel count; telephony audio is mono.
        channels: u16,
        /// Language hints.
        language_hints: Vec<String>,
        /// Provider model identifier.
        model: String,
        /// Ask for endpoint detection.
        enable_endpoint_detection: bool,
        /// Ask for interim results.
        enable_interim: bool,
    },
    /// No-op that keeps an idle stream open.
    Keepalive,
    /// Force pending partials to be emitted as final.
    Finalize {
        /// Silence the recognizer should assume after the last audio.
        trailing_silence_ms: u64,
    },
    /// Graceful end of the recognition session.
    Close,
}

impl ClientMessage {
    /// The configuration frame for a session.
    pub fn configure(config: &SttConfig) -> Self {
        let codec = match config.audio_format {
            crate::audio::AudioCodec::Ulaw8k => "ulaw",
            crate::audio::AudioCodec::Pcm { .. } => "pcm",
            crate::audio::AudioCodec::Mp3 { .. } => "mp3",
        };
        Self::Configure {
            codec: codec.to_owned(),
            sample_rate: config.sample_rate,
            channels: 1,
            language_hints: config.language_hints.clone(),
            model: config.model.clone(),
            enable_endpoint_detection: config.enable_endpoint_detection,
            enable_interim: config.enable_interim,
        }
    }
}

/// One recognized token on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToken {
    /// Text fragment, or a special marker.
    pub text: String,
    /// Confirmed (final) vs. candidate (interim).
    #[serde(default)]
    pub is_final: bool,
    /// Detected language tag, when the recognizer reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl WireToken {
    /// An interim token.
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            language: None,
        }
    }

    /// A final token.
    pub fn fin(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            language: None,
        }
    }

    /// The endpoint marker.
    pub fn endpoint() -> Self {
        Self::fin(END_MARKER)
    }
}

/// Messages received from the recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session accepted; audio may flow.
    Ready,
    /// A batch of recognized tokens, delivered in order.
    Tokens {
        /// The batch.
        tokens: Vec<WireToken>,
    },
    /// Recognizer-side failure.
    Error {
        /// Human-readable description.
        message: String,
        /// Authentication/protocol failures are fatal; transport hiccups
        /// are not.
        #[serde(default)]
        fatal: bool,
    },
    /// Anything this client version does not understand.
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_frame_serializes_with_tag() {
        let config = SttConfig {
            model: "nova".into(),
            language_hints: vec!["en".into(), "ur".into()],
            ..SttConfig::default()
        };
        let json = serde_json::to_string(&ClientMessage::configure(&config)).unwrap_or_default();
        assert!(json.contains("\"type\":\"configure\""));
        assert!(json.contains("\"codec\":\"ulaw\""));
        assert!(json.contains("\"sample_rate\":8000"));
        assert!(json.contains("\"model\":\"nova\""));
    }

    #[test]
    fn keepalive_is_tiny() {
        let json = serde_json::to_string(&ClientMessage::Keepalive).unwrap_or_default();
        assert_eq!(json, r#"{"type":"keepalive"}"#);
    }

    #[test]
    fn token_batch_round_trips() {
        let msg = ServerMessage::Tokens {
            tokens: vec![
                WireToken::interim("hel"),
                WireToken::fin("hello "),
                WireToken::endpoint(),
            ],
        };
        let json = serde_json::to_string(&msg).unwrap_or_default();
        let parsed: Result<ServerMessage, _> = serde_json::from_str(&json);
        match parsed {
            Ok(p) => assert_eq!(p, msg),
            Err(_) => unreachable!("token batch deserializes"),
        }
    }

    #[test]
    fn unknown_server_message_maps_to_other() {
        let parsed: Result<ServerMessage, _> =
            serde_json::from_str(r#"{"type":"metadata","foo":1}"#);
        assert_eq!(parsed.ok(), Some(ServerMessage::Other));
    }

    #[test]
    fn error_fatal_defaults_false() {
        let parsed: Result<ServerMessage, _> =
            serde_json::from_str(r#"{"type":"error","message":"hiccup"}"#);
        match parsed {
            Ok(ServerMessage::Error { fatal, .. }) => assert!(!fatal),
            _ => unreachable!("error deserializes"),
        }
    }
}
