//! Outward session events and their wire encoding.
//!
//! The telephony edge consumes one ordered stream of these. Control events
//! travel as JSON; audio payloads are base64-encoded in the wire form.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::conversation::EndReason;
use crate::session::metrics::{CostBreakdown, MetricsSnapshot};

/// Who said a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    /// The caller.
    User,
    /// The agent.
    Agent,
}

/// One line of the session transcript log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Speaker.
    pub role: TranscriptRole,
    /// What was said.
    pub text: String,
}

/// Events emitted by the session toward the telephony edge, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Configuration installed; the agent is live.
    AgentReady,
    /// Synthesized audio for the telephony link.
    AudioDelta {
        /// Audio bytes in the session's outbound codec.
        bytes: Bytes,
    },
    /// The current agent utterance finished playing out.
    AudioDone,
    /// A finalized caller utterance.
    UserTranscript {
        /// Utterance text.
        text: String,
    },
    /// The text of the agent turn about to be spoken.
    AgentTranscript {
        /// Turn text.
        text: String,
    },
    /// The model wants a tool resolved externally.
    FunctionCall {
        /// Correlates the eventual result.
        call_id: String,
        /// Tool name.
        name: String,
        /// JSON-encoded argument string.
        arguments: String,
    },
    /// The caller began speaking.
    SpeechStarted,
    /// Nobody has spoken for the configured window.
    SilenceTimeout,
    /// Terminal: the session is over.
    ConversationEnded {
        /// Why.
        reason: EndReason,
        /// Final usage counters.
        metrics: MetricsSnapshot,
        /// Priced usage.
        cost: CostBreakdown,
        /// Ordered turn transcript.
        transcript: Vec<TranscriptEntry>,
    },
    /// An unrecoverable failure, reported before the session ends.
    Error {
        /// Description.
        message: String,
    },
}

impl SessionEvent {
    /// JSON wire form sent to the telephony edge. Audio is base64.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Self::AgentReady => serde_json::json!({"type": "agent.ready"}),
            Self::AudioDelta { bytes } => serde_json::json!({
                "type": "audio.delta",
                "audio": BASE64.encode(bytes),
            }),
            Self::AudioDone => serde_json::json!({"type": "audio.done"}),
            Self::UserTranscript { text } => serde_json::json!({
                "type": "transcript.user",
                "text": text,
            }),
            Self::AgentTranscript { text } => serde_json::json!({
                "type": "transcript.agent",
                "text": text,
            }),
            Self::FunctionCall {
                call_id,
                name,
                arguments,
            } => serde_json::json!({
                "type": "function.call",
                "call_id": call_id,
                "name": name,
                "arguments": arguments,
            }),
            Self::SpeechStarted => serde_json::json!({"type": "speech.started"}),
            Self::SilenceTimeout => serde_json::json!({"type": "silence.timeout"}),
            Self::ConversationEnded {
                reason,
                metrics,
                cost,
                transcript,
            } => serde_json::json!({
                "type": "conversation.ended",
                "reason": reason.to_string(),
                "metrics": metrics,
                "cost": cost,
                "transcript": transcript,
            }),
            Self::Error { message } => serde_json::json!({
                "type": "error",
                "message": message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_delta_is_base64_on_the_wire() {
        let event = SessionEvent::AudioDelta {
            bytes: Bytes::from_static(&[0xFF, 0x7F, 0x00]),
        };
        let wire = event.to_wire();
        assert_eq!(wire["type"], "audio.delta");
        let decoded = BASE64
            .decode(wire["audio"].as_str().unwrap_or_default())
            .unwrap_or_default();
        assert_eq!(decoded, vec![0xFF, 0x7F, 0x00]);
    }

    #[test]
    fn function_call_arguments_stay_a_string() {
        let event = SessionEvent::FunctionCall {
            call_id: "call_1".into(),
            name: "get_weather".into(),
            arguments: r#"{"city":"Karachi"}"#.into(),
        };
        let wire = event.to_wire();
        assert_eq!(wire["type"], "function.call");
        assert_eq!(wire["arguments"], r#"{"city":"Karachi"}"#);
        assert!(wire["arguments"].is_string());
    }

    #[test]
    fn event_type_labels_match_the_edge_protocol() {
        assert_eq!(SessionEvent::AgentReady.to_wire()["type"], "agent.ready");
        assert_eq!(
            SessionEvent::SpeechStarted.to_wire()["type"],
            "speech.started"
        );
        assert_eq!(
            SessionEvent::SilenceTimeout.to_wire()["type"],
            "silence.timeout"
        );
        assert_eq!(SessionEvent::AudioDone.to_wire()["type"], "audio.done");
        assert_eq!(
            SessionEvent::UserTranscript { text: "x".into() }.to_wire()["type"],
            "transcript.user"
        );
        assert_eq!(
            SessionEvent::AgentTranscript { text: "x".into() }.to_wire()["type"],
            "transcript.agent"
        );
    }

    #[test]
    fn conversation_ended_carries_metrics_and_transcript() {
        let event = SessionEvent::ConversationEnded {
            reason: EndReason::Hangup,
            metrics: MetricsSnapshot {
                stt_audio_seconds: 1.0,
                llm_input_tokens: 10,
                llm_output_tokens: 5,
                tts_characters: 20,
                wall_clock_minutes: 0.5,
            },
            cost: CostBreakdown {
                stt_usd: 0.0,
                llm_usd: 0.0,
                tts_usd: 0.0,
                total_usd: 0.0,
            },
            transcript: vec![TranscriptEntry {
                role: TranscriptRole::User,
                text: "hello".into(),
            }],
        };
        let wire = event.to_wire();
        assert_eq!(wire["reason"], "hangup");
        assert_eq!(wire["metrics"]["llm_input_tokens"], 10);
        assert_eq!(wire["transcript"][0]["role"], "user");
    }
}
