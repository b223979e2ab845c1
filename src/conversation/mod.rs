//! Turn-taking state machine.
//!
//! Consumes recognizer and synthesis activity, decides whose turn it is and
//! tells the session what to do next. The machine is synchronous and owns no
//! I/O: the session orchestrator drives it from its event loop and executes
//! the returned signals, which keeps every transition deterministic and
//! testable without a socket in sight.
//!
//! ```text
//! idle ── user speech ──▶ user_speaking ── endpoint ──▶ thinking
//!   ▲                          ▲                            │
//!   │                          │ barge-in              first audio
//!   └──── audio done ──── agent_speaking ◀───────────────────┘
//! ```

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::ConversationConfig;

/// Whose turn it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No party speaking.
    Idle,
    /// The caller is talking.
    UserSpeaking,
    /// Waiting on the language model.
    Thinking,
    /// Synthesized audio is playing.
    AgentSpeaking,
    /// Call over. Terminal.
    Ended,
}

/// Why the conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The edge hung up or asked for teardown.
    Hangup,
    /// Nobody spoke for the configured window and the session chose to end.
    SilenceTimeout,
    /// An unrecoverable component failure.
    Error,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hangup => write!(f, "hangup"),
            Self::SilenceTimeout => write!(f, "silence_timeout"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Instructions for the session orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationSignal {
    /// Speak the configured greeting before any user turn.
    GreetingRequested {
        /// Greeting text; goes to history as an assistant message.
        text: String,
    },
    /// The caller began an utterance.
    SpeechStarted,
    /// A user turn completed; generate the next agent turn.
    ResponseRequested {
        /// The finalized utterance.
        transcript: String,
    },
    /// The caller interrupted mid-synthesis: cancel TTS, flush audio,
    /// force a recognizer finalize. The partial agent turn is discarded.
    AgentInterrupted,
    /// No speech activity for the configured window.
    SilenceTimeout,
    /// Terminal.
    ConversationEnded {
        /// Why.
        reason: EndReason,
    },
}

/// The turn-taking state machine for one session.
#[derive(Debug)]
pub struct ConversationManager {
    config: ConversationConfig,
    greeting: Option<String>,
    state: TurnState,
    last_activity: Instant,
}

impl ConversationManager {
    /// Create the machine in `Idle` with the silence clock running.
    pub fn new(config: ConversationConfig, greeting: Option<String>, now: Instant) -> Self {
        Self {
            config,
            greeting,
            state: TurnState::Idle,
            last_activity: now,
        }
    }

    /// Current state.
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Session start: requests the greeting when one is configured.
    pub fn start(&mut self, now: Instant) -> Vec<ConversationSignal> {
        self.last_activity = now;
        match self.greeting.take() {
            Some(text) if !text.is_empty() => {
                // Straight to agent_speaking; no user turn intervenes.
                self.state = TurnState::AgentSpeaking;
                vec![ConversationSignal::GreetingRequested { text }]
            }
            _ => Vec::new(),
        }
    }

    /// Recognizer interim activity with non-empty text.
    pub fn on_interim(&mut self, text: &str, now: Instant) -> Vec<ConversationSignal> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.last_activity = now;
        match self.state {
            TurnState::Idle => {
                self.state = TurnState::UserSpeaking;
                vec![ConversationSignal::SpeechStarted]
            }
            TurnState::AgentSpeaking if self.config.barge_in => {
                self.state = TurnState::UserSpeaking;
                vec![
                    ConversationSignal::AgentInterrupted,
                    ConversationSignal::SpeechStarted,
                ]
            }
            _ => Vec::new(),
        }
    }

    /// Recognizer endpoint: the caller's utterance is complete.
    pub fn on_speech_ended(&mut self, transcript: &str, now: Instant) -> Vec<ConversationSignal> {
        if self.state == TurnState::Ended {
            return Vec::new();
        }
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Vec::new();
        }
        self.last_activity = now;
        self.state = TurnState::Thinking;
        vec![ConversationSignal::ResponseRequested {
            transcript: transcript.to_owned(),
        }]
    }

    /// First synthesized chunk reached the caller.
    pub fn on_agent_audio_started(&mut self) {
        if matches!(self.state, TurnState::Thinking | TurnState::Idle) {
            self.state = TurnState::AgentSpeaking;
        }
    }

    /// Synthesis played out in full.
    pub fn on_agent_audio_done(&mut self, now: Instant) {
        if self.state == TurnState::AgentSpeaking {
            self.state = TurnState::Idle;
            self.last_activity = now;
        }
    }

    /// The agent turn died early (generation or synthesis failure). The
    /// conversation goes back to waiting on the caller.
    pub fn on_agent_turn_aborted(&mut self, now: Instant) {
        if matches!(self.state, TurnState::Thinking | TurnState::AgentSpeaking) {
            self.state = TurnState::Idle;
            self.last_activity = now;
        }
    }

    /// Periodic clock; fires the silence timeout while the machine is
    /// waiting on the caller.
    pub fn tick(&mut self, now: Instant) -> Vec<ConversationSignal> {
        if !matches!(self.state, TurnState::Idle | TurnState::UserSpeaking) {
            return Vec::new();
        }
        let elapsed = now.duration_since(self.last_activity);
        if elapsed.as_millis() as u64 >= self.config.silence_timeout_ms {
            // Restart the window so the signal repeats rather than spams.
            self.last_activity = now;
            return vec![ConversationSignal::SilenceTimeout];
        }
        Vec::new()
    }

    /// Terminal transition.
    pub fn end(&mut self, reason: EndReason) -> Vec<ConversationSignal> {
        if self.state == TurnState::Ended {
            return Vec::new();
        }
        self.state = TurnState::Ended;
        vec![ConversationSignal::ConversationEnded { reason }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(greeting: Option<&str>) -> ConversationManager {
        ConversationManager::new(
            ConversationConfig::default(),
            greeting.map(str::to_owned),
            Instant::now(),
        )
    }

    #[test]
    fn starts_idle_without_greeting() {
        let mut m = manager(None);
        assert!(m.start(Instant::now()).is_empty());
        assert_eq!(m.state(), TurnState::Idle);
    }

    #[test]
    fn greeting_goes_straight_to_agent_speaking() {
        let mut m = manager(Some("Hello, how can I help?"));
        let signals = m.start(Instant::now());
        assert_eq!(
            signals,
            vec![ConversationSignal::GreetingRequested {
                text: "Hello, how can I help?".into()
            }]
        );
        assert_eq!(m.state(), TurnState::AgentSpeaking);
    }

    #[test]
    fn interim_from_idle_starts_user_turn() {
        let mut m = manager(None);
        let signals = m.on_interim("what", Instant::now());
        assert_eq!(signals, vec![ConversationSignal::SpeechStarted]);
        assert_eq!(m.state(), TurnState::UserSpeaking);
    }

    #[test]
    fn empty_interim_is_ignored() {
        let mut m = manager(None);
        assert!(m.on_interim("   ", Instant::now()).is_empty());
        assert_eq!(m.state(), TurnState::Idle);
    }

    #[test]
    fn full_turn_cycle() {
        let now = Instant::now();
        let mut m = manager(None);
        m.on_interim("what time", now);
        let signals = m.on_speech_ended("what time is it", now);
        assert_eq!(
            signals,
            vec![ConversationSignal::ResponseRequested {
                transcript: "what time is it".into()
            }]
        );
        assert_eq!(m.state(), TurnState::Thinking);
        m.on_agent_audio_started();
        assert_eq!(m.state(), TurnState::AgentSpeaking);
        m.on_agent_audio_done(now);
        assert_eq!(m.state(), TurnState::Idle);
    }

    #[test]
    fn barge_in_interrupts_agent() {
        let mut m = manager(Some("long greeting"));
        m.start(Instant::now());
        assert_eq!(m.state(), TurnState::AgentSpeaking);
        let signals = m.on_interim("stop", Instant::now());
        assert_eq!(
            signals,
            vec![
                ConversationSignal::AgentInterrupted,
                ConversationSignal::SpeechStarted,
            ]
        );
        assert_eq!(m.state(), TurnState::UserSpeaking);
    }

    #[test]
    fn barge_in_disabled_keeps_agent_talking() {
        let mut m = ConversationManager::new(
            ConversationConfig {
                barge_in: false,
                ..ConversationConfig::default()
            },
            Some("greeting".into()),
            Instant::now(),
        );
        m.start(Instant::now());
        assert!(m.on_interim("stop", Instant::now()).is_empty());
        assert_eq!(m.state(), TurnState::AgentSpeaking);
    }

    #[test]
    fn silence_timeout_fires_while_idle() {
        let start = Instant::now();
        let mut m = manager(None);
        m.start(start);
        let later = start + Duration::from_millis(30_001);
        assert_eq!(m.tick(later), vec![ConversationSignal::SilenceTimeout]);
        // The window restarts; no immediate repeat.
        assert!(m.tick(later + Duration::from_millis(10)).is_empty());
    }

    #[test]
    fn silence_clock_paused_while_agent_speaks() {
        let start = Instant::now();
        let mut m = manager(Some("greeting"));
        m.start(start);
        let later = start + Duration::from_millis(60_000);
        assert!(m.tick(later).is_empty());
    }

    #[test]
    fn interim_refreshes_silence_clock() {
        let start = Instant::now();
        let mut m = manager(None);
        m.start(start);
        let mid = start + Duration::from_millis(29_000);
        m.on_interim("hm", mid);
        assert!(m.tick(start + Duration::from_millis(31_000)).is_empty());
        assert_eq!(
            m.tick(mid + Duration::from_millis(30_000)),
            vec![ConversationSignal::SilenceTimeout]
        );
    }

    #[test]
    fn aborted_turn_returns_to_idle() {
        let now = Instant::now();
        let mut m = manager(None);
        m.on_interim("hi", now);
        m.on_speech_ended("hi", now);
        assert_eq!(m.state(), TurnState::Thinking);
        m.on_agent_turn_aborted(now);
        assert_eq!(m.state(), TurnState::Idle);
    }

    #[test]
    fn end_is_terminal_and_idempotent() {
        let mut m = manager(None);
        let signals = m.end(EndReason::Hangup);
        assert_eq!(
            signals,
            vec![ConversationSignal::ConversationEnded {
                reason: EndReason::Hangup
            }]
        );
        assert_eq!(m.state(), TurnState::Ended);
        assert!(m.end(EndReason::Error).is_empty());
        assert!(m.on_speech_ended("hello", Instant::now()).is_empty());
    }

    #[test]
    fn states_are_exclusive_across_transitions() {
        // Every event lands the machine in exactly one named state.
        let now = Instant::now();
        let mut m = manager(None);
        assert_eq!(m.state(), TurnState::Idle);
        m.on_interim("a", now);
        assert_eq!(m.state(), TurnState::UserSpeaking);
        m.on_speech_ended("a", now);
        assert_eq!(m.state(), TurnState::Thinking);
        m.on_agent_audio_started();
        assert_eq!(m.state(), TurnState::AgentSpeaking);
        m.on_agent_audio_done(now);
        assert_eq!(m.state(), TurnState::Idle);
        m.end(EndReason::Hangup);
        assert_eq!(m.state(), TurnState::Ended);
    }
}
