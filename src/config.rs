//! Configuration types for a dialog session.
//!
//! An [`AgentConfig`] is snapshotted when a call is accepted and stays
//! immutable for the session. Defaults match narrowband telephony:
//! µ-law 8 kHz inbound, 30 s silence timeout, barge-in enabled.

use serde::{Deserialize, Serialize};

use crate::audio::AudioCodec;

/// Immutable per-session agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// System prompt installed at the head of conversation history.
    pub system_prompt: String,
    /// Optional greeting spoken before the first user turn.
    pub greeting: Option<String>,
    /// Streaming recognizer settings.
    pub stt: SttConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Turn-taking settings.
    pub conversation: ConversationConfig,
    /// Per-unit billing rates.
    pub pricing: PricingConfig,
}

/// Streaming recognizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Recognizer endpoint (ws:// or wss://).
    pub url: String,
    /// Provider-specific model identifier.
    pub model: String,
    /// Language hints forwarded in the configuration frame.
    pub language_hints: Vec<String>,
    /// Inbound audio sample rate in Hz.
    pub sample_rate: u32,
    /// Inbound audio codec.
    pub audio_format: AudioCodec,
    /// Ask the recognizer to signal end-of-utterance.
    pub enable_endpoint_detection: bool,
    /// Ask the recognizer for interim (non-final) transcripts.
    pub enable_interim: bool,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reattempt the stream after an abnormal close.
    pub auto_reconnect: bool,
    /// Base delay for linear reconnect backoff, in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Give up after this many consecutive reconnect attempts.
    pub max_reconnect_attempts: u32,
    /// Keepalive timer interval in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Send a keepalive when no audio has been written for this long.
    pub audio_idle_threshold_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            model: String::new(),
            language_hints: Vec::new(),
            sample_rate: 8_000,
            audio_format: AudioCodec::Ulaw8k,
            enable_endpoint_detection: true,
            enable_interim: true,
            connect_timeout_ms: 10_000,
            auto_reconnect: true,
            reconnect_base_delay_ms: 1_000,
            max_reconnect_attempts: 5,
            keepalive_interval_ms: 15_000,
            audio_idle_threshold_ms: 10_000,
        }
    }
}

/// One language-model backend endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmEndpoint {
    /// Base URL of the chat-completions server.
    pub base_url: String,
    /// Model name requested from this backend.
    pub model: String,
    /// Bearer token; empty disables the Authorization header.
    pub api_key: String,
}

impl LlmEndpoint {
    /// Whether this endpoint is filled in enough to be dialed.
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.model.is_empty()
    }
}

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Preferred backend.
    pub primary: LlmEndpoint,
    /// Backend tried exactly once when the primary fails.
    pub secondary: Option<LlmEndpoint>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap per turn.
    pub max_tokens: u32,
    /// Trailing history window (messages kept besides the system prompt).
    pub history_window: usize,
    /// Tool definitions in any of the accepted shapes (normalized on
    /// configure).
    pub tools: Vec<serde_json::Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: LlmEndpoint::default(),
            secondary: None,
            temperature: 0.7,
            max_tokens: 1024,
            history_window: 20,
            tools: Vec::new(),
        }
    }
}

/// Synthesis output handling mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsOutputMode {
    /// Synthesizer codec matches the telephony link; forward chunks as-is.
    #[default]
    PassThrough,
    /// Linear 16-bit PCM at the declared sample rate; edge resamples.
    Pcm,
    /// MP3 chunks decoded internally to linear PCM.
    Mp3,
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Synthesizer endpoint (http:// or https://).
    pub url: String,
    /// Bearer token; empty disables the Authorization header.
    pub api_key: String,
    /// Voice identifier.
    pub voice: String,
    /// Provider-specific model identifier.
    pub model: Option<String>,
    /// How the synthesizer's output reaches the telephony side.
    pub output_mode: TtsOutputMode,
    /// Output format label sent to the synthesizer (e.g. `ULAW_8000_8`,
    /// `PCM_22050_16`, `MP3_22050_128`).
    pub output_format: String,
    /// Sample rate of the synthesizer output in Hz.
    pub sample_rate: u32,
    /// Length of the start-of-utterance gain ramp in milliseconds.
    pub fade_in_ms: u32,
    /// Decimate PCM output down to the telephony rate.
    pub resample_downshift: bool,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            voice: String::new(),
            model: None,
            output_mode: TtsOutputMode::PassThrough,
            output_format: "ULAW_8000_8".to_owned(),
            sample_rate: 8_000,
            fade_in_ms: 200,
            resample_downshift: false,
        }
    }
}

/// Turn-taking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// End-of-call silence timeout in milliseconds.
    pub silence_timeout_ms: u64,
    /// Let the caller interrupt the agent mid-utterance.
    pub barge_in: bool,
    /// Start synthesis at sentence boundaries while the LLM is still
    /// streaming instead of waiting for the full completion.
    pub early_speak: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: 30_000,
            barge_in: true,
            early_speak: false,
        }
    }
}

/// Per-unit billing rates, in USD.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Per second of audio sent to the recognizer.
    pub stt_per_second: f64,
    /// Per 1k prompt tokens.
    pub llm_input_per_1k: f64,
    /// Per 1k completion tokens.
    pub llm_output_per_1k: f64,
    /// Per synthesized character.
    pub tts_per_char: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            stt_per_second: 0.0,
            llm_input_per_1k: 0.0,
            llm_output_per_1k: 0.0,
            tts_per_char: 0.0,
        }
    }
}

impl AgentConfig {
    /// Validate the parts required before a call can begin.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SessionError::Config`] naming the first missing or
    /// inconsistent field.
    pub fn validate(&self) -> crate::Result<()> {
        if self.stt.url.is_empty() {
            return Err(crate::SessionError::Config("stt.url is empty".into()));
        }
        if !self.llm.primary.is_configured() {
            return Err(crate::SessionError::Config(
                "llm.primary endpoint is not configured".into(),
            ));
        }
        if self.tts.url.is_empty() {
            return Err(crate::SessionError::Config("tts.url is empty".into()));
        }
        if self.tts.voice.is_empty() {
            return Err(crate::SessionError::Config("tts.voice is empty".into()));
        }
        if self.tts.output_mode == TtsOutputMode::Mp3 && self.tts.sample_rate == 0 {
            return Err(crate::SessionError::Config(
                "tts.sample_rate required for mp3 output".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.stt.url = "ws://localhost:9000".into();
        config.llm.primary = LlmEndpoint {
            base_url: "http://localhost:9001".into(),
            model: "gpt-4o-mini".into(),
            api_key: String::new(),
        };
        config.tts.url = "http://localhost:9002".into();
        config.tts.voice = "amber".into();
        config
    }

    #[test]
    fn defaults_match_telephony() {
        let config = AgentConfig::default();
        assert_eq!(config.stt.sample_rate, 8_000);
        assert_eq!(config.stt.audio_format, AudioCodec::Ulaw8k);
        assert!(config.stt.enable_endpoint_detection);
        assert!(config.stt.enable_interim);
        assert_eq!(config.llm.temperature, 0.7);
        assert_eq!(config.llm.max_tokens, 1024);
        assert_eq!(config.llm.history_window, 20);
        assert_eq!(config.conversation.silence_timeout_ms, 30_000);
        assert!(config.conversation.barge_in);
        assert!(!config.conversation.early_speak);
        assert_eq!(config.tts.fade_in_ms, 200);
        assert!(!config.tts.resample_downshift);
    }

    #[test]
    fn validate_accepts_minimal() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_stt_url() {
        let mut config = minimal();
        config.stt.url.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unconfigured_primary() {
        let mut config = minimal();
        config.llm.primary.model.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_voice() {
        let mut config = minimal();
        config.tts.voice.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = minimal();
        let json = serde_json::to_string(&config).unwrap_or_default();
        let parsed: Result<AgentConfig, _> = serde_json::from_str(&json);
        assert!(parsed.is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let parsed: Result<AgentConfig, _> =
            serde_json::from_str(r#"{"system_prompt":"You are a receptionist."}"#);
        match parsed {
            Ok(config) => {
                assert_eq!(config.system_prompt, "You are a receptionist.");
                assert_eq!(config.conversation.silence_timeout_ms, 30_000);
            }
            Err(_) => unreachable!("partial config deserializes"),
        }
    }
}
