//! Session orchestration: one call, one task tree.
//!
//! The orchestrator composes the recognizer, model and synthesizer clients,
//! runs the turn-taking state machine, bridges audio outward and accounts
//! cost. Components never reference each other: they emit events into the
//! session loop, and the loop issues commands back: one direction each way.
//!
//! Task layout per call: the session loop (conversation manager included),
//! the recognizer supervisor, one task per LLM turn and one per synthesis.
//! Cancellation flows from [`SessionOrchestrator::disconnect`] through a
//! token tree and is bounded, so teardown never hangs on a stuck backend.

pub mod events;
pub mod metrics;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::AudioFrame;
use crate::config::{AgentConfig, PricingConfig};
use crate::conversation::{ConversationManager, ConversationSignal, EndReason};
use crate::error::Result;
use crate::llm::tools::ToolCall;
use crate::llm::{Completion, LlmClient};
use crate::stt::{SttClient, SttEvent};
use crate::tts::{TtsClient, TtsEvent};
use events::{SessionEvent, TranscriptEntry, TranscriptRole};
use metrics::{CostBreakdown, CostMetrics};

/// Conversation clock period; also bounds barge-in reaction latency.
const TICK_PERIOD: Duration = Duration::from_millis(50);

/// How long disconnect waits for the session loop to drain.
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// Commands from the edge-facing API into the session loop.
enum Command {
    Configure(Box<AgentConfig>),
    ToolResult { call_id: String, result: String },
    Disconnect,
}

/// Events from per-turn tasks back into the session loop.
enum TurnEvent {
    Token { delta: String },
    Completed(Box<Option<Completion>>),
    Failed { message: String },
    SynthesisFailed { message: String },
}

/// One live call.
pub struct SessionOrchestrator {
    session_id: Uuid,
    tenant_id: String,
    agent_id: String,
    config: AgentConfig,
    metrics: Arc<CostMetrics>,
    started_at: DateTime<Utc>,
    stt: Option<Arc<SttClient>>,
    command_tx: Option<mpsc::UnboundedSender<Command>>,
    loop_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    in_call: AtomicBool,
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("session_id", &self.session_id)
            .field("tenant_id", &self.tenant_id)
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

impl SessionOrchestrator {
    /// Create a session for one accepted call.
    pub fn new(
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        config: AgentConfig,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            config,
            metrics: Arc::new(CostMetrics::default()),
            started_at: Utc::now(),
            stt: None,
            command_tx: None,
            loop_task: None,
            cancel: CancellationToken::new(),
            in_call: AtomicBool::new(false),
        }
    }

    /// Session identifier.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Tenant this call bills to.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Agent driving this call.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Wall-clock moment the session was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the call is currently up.
    pub fn is_in_call(&self) -> bool {
        self.in_call.load(Ordering::Relaxed)
    }

    /// Bring up every component; fails atomically.
    ///
    /// The returned receiver carries every outward [`SessionEvent`] in
    /// order. After [`disconnect`](Self::disconnect) it yields `None`.
    ///
    /// # Errors
    ///
    /// Configuration errors surface here, before the call begins; so do
    /// recognizer connect failures. On any error all components come down.
    pub async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        self.config.validate()?;

        // Local components first; the network dial goes last so a failure
        // leaves nothing half-up.
        let tts = Arc::new(TtsClient::new(
            self.config.tts.clone(),
            Arc::clone(&self.metrics),
        ));
        tts.initialize()?;
        let llm = LlmClient::new(&self.config.llm, Arc::clone(&self.metrics))?;

        let mut stt = SttClient::new(self.config.stt.clone(), Arc::clone(&self.metrics));
        let stt_rx = match stt.connect().await {
            Ok(rx) => rx,
            Err(e) => {
                tts.cancel();
                return Err(e);
            }
        };
        let stt = Arc::new(stt);
        self.stt = Some(Arc::clone(&stt));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (tts_tx, tts_rx) = mpsc::unbounded_channel();
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        self.command_tx = Some(command_tx);
        self.in_call.store(true, Ordering::Relaxed);

        let runtime = SessionRuntime {
            session_id: self.session_id,
            pricing: self.config.pricing.clone(),
            early_speak: self.config.conversation.early_speak,
            manager: None,
            llm,
            tts,
            stt,
            metrics: Arc::clone(&self.metrics),
            started: Instant::now(),
            events_tx,
            tts_tx,
            turn_tx,
            turn_task: None,
            synth_task: None,
            synth_inflight: false,
            turn_streaming: false,
            current_request: None,
            speak_queue: VecDeque::new(),
            turn_buffer: String::new(),
            enqueued_len: 0,
            pending_tool: None,
            transcript_log: Vec::new(),
            ended: false,
            cancel: self.cancel.clone(),
        };
        self.loop_task = Some(tokio::spawn(runtime.run(
            stt_rx,
            command_rx,
            tts_rx,
            turn_rx,
        )));

        info!(session_id = %self.session_id, tenant = %self.tenant_id, "session connected");
        Ok(events_rx)
    }

    /// Install agent configuration, start the conversation manager and
    /// emit `agent.ready` (followed by the greeting, when configured).
    pub fn configure_session(&self, config: AgentConfig) {
        self.send_command(Command::Configure(Box::new(config)));
    }

    /// Forward one telephony audio frame to the recognizer. Non-blocking;
    /// `false` means the frame was dropped.
    pub fn send_audio(&self, frame: &AudioFrame) -> bool {
        match &self.stt {
            Some(stt) => stt.send_audio(frame),
            None => false,
        }
    }

    /// Resolve an outstanding `function.call` and trigger the follow-up
    /// agent turn.
    pub fn send_tool_result(&self, call_id: &str, result: serde_json::Value) {
        self.send_command(Command::ToolResult {
            call_id: call_id.to_owned(),
            result: result.to_string(),
        });
    }

    /// Orderly teardown in reverse dependency order. Idempotent.
    ///
    /// After this returns, no further outward events are emitted.
    pub async fn disconnect(&mut self) {
        self.in_call.store(false, Ordering::Relaxed);
        self.send_command(Command::Disconnect);
        if let Some(task) = self.loop_task.take()
            && timeout(TEARDOWN_GRACE, task).await.is_err()
        {
            warn!(session_id = %self.session_id, "session loop did not drain; cancelling");
            self.cancel.cancel();
        }
        // Belt and braces: the loop already stopped the components.
        self.cancel.cancel();
        if let Some(stt) = &self.stt {
            stt.cancel();
        }
        self.command_tx = None;
        info!(session_id = %self.session_id, "session disconnected");
    }

    fn send_command(&self, command: Command) {
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(command);
        }
    }
}

// ── session loop ──────────────────────────────────────────────

struct SessionRuntime {
    session_id: Uuid,
    pricing: PricingConfig,
    early_speak: bool,
    manager: Option<ConversationManager>,
    llm: LlmClient,
    tts: Arc<TtsClient>,
    stt: Arc<SttClient>,
    metrics: Arc<CostMetrics>,
    started: Instant,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    tts_tx: mpsc::UnboundedSender<TtsEvent>,
    turn_tx: mpsc::UnboundedSender<TurnEvent>,
    turn_task: Option<JoinHandle<()>>,
    synth_task: Option<JoinHandle<()>>,
    synth_inflight: bool,
    turn_streaming: bool,
    current_request: Option<Uuid>,
    speak_queue: VecDeque<String>,
    turn_buffer: String,
    enqueued_len: usize,
    pending_tool: Option<ToolCall>,
    transcript_log: Vec<TranscriptEntry>,
    ended: bool,
    cancel: CancellationToken,
}

impl SessionRuntime {
    async fn run(
        mut self,
        mut stt_rx: mpsc::UnboundedReceiver<SttEvent>,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut tts_rx: mpsc::UnboundedReceiver<TtsEvent>,
        mut turn_rx: mpsc::UnboundedReceiver<TurnEvent>,
    ) {
        let cancel = self.cancel.clone();
        let mut tick = tokio::time::interval(TICK_PERIOD);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.end_session(EndReason::Hangup);
                }
                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // The orchestrator handle is gone; treat as hang-up.
                    None => self.end_session(EndReason::Hangup),
                },
                Some(event) = stt_rx.recv() => self.handle_stt(event),
                Some(event) = tts_rx.recv() => self.handle_tts(event),
                Some(event) = turn_rx.recv() => self.handle_turn(event),
                _ = tick.tick() => self.handle_tick(),
            }
            if self.ended {
                break;
            }
        }

        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
        if let Some(task) = self.synth_task.take() {
            task.abort();
        }
        debug!(session_id = %self.session_id, "session loop finished");
    }

    // ── command handling ──────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Configure(config) => {
                self.llm
                    .configure(&config.system_prompt, &config.llm.tools);
                if !config.tts.voice.is_empty() {
                    self.tts.set_voice(config.tts.voice.clone());
                }
                self.early_speak = config.conversation.early_speak;
                self.pricing = config.pricing.clone();
                let now = Instant::now();
                let mut manager = ConversationManager::new(
                    config.conversation.clone(),
                    config.greeting.clone(),
                    now,
                );
                self.emit(SessionEvent::AgentReady);
                let signals = manager.start(now);
                self.manager = Some(manager);
                self.process_signals(signals);
            }
            Command::ToolResult { call_id, result } => {
                let Some(call) = self.pending_tool.take() else {
                    warn!(%call_id, "tool result with no outstanding call");
                    return;
                };
                if call.call_id != call_id {
                    warn!(
                        expected = %call.call_id,
                        got = %call_id,
                        "tool result call id mismatch"
                    );
                }
                self.llm.add_tool_result(&call.name, &call_id, &result);
                self.start_followup_turn();
            }
            Command::Disconnect => {
                self.end_session(EndReason::Hangup);
            }
        }
    }

    // ── recognizer events ─────────────────────────────────────

    fn handle_stt(&mut self, event: SttEvent) {
        let now = Instant::now();
        match event {
            SttEvent::Ready => debug!("recognizer ready"),
            SttEvent::Interim { text } => {
                let signals = match &mut self.manager {
                    Some(manager) => manager.on_interim(&text, now),
                    None => Vec::new(),
                };
                self.process_signals(signals);
            }
            SttEvent::Partial { .. } => {}
            SttEvent::Final { text } => {
                self.transcript_log.push(TranscriptEntry {
                    role: TranscriptRole::User,
                    text: text.clone(),
                });
                self.emit(SessionEvent::UserTranscript { text });
            }
            SttEvent::SpeechEnded { transcript } => {
                let signals = match &mut self.manager {
                    Some(manager) => manager.on_speech_ended(&transcript, now),
                    None => Vec::new(),
                };
                self.process_signals(signals);
            }
            SttEvent::Finished => debug!("recognizer closed gracefully"),
            SttEvent::Disconnected { code, reason } => {
                info!(code, %reason, "recognizer transport dropped");
            }
            SttEvent::Reconnected { attempts } => {
                info!(attempts, "recognizer transport restored");
            }
            SttEvent::ReconnectFailed => {
                self.emit(SessionEvent::Error {
                    message: "speech recognition lost and could not be restored".into(),
                });
                self.end_session(EndReason::Error);
            }
            SttEvent::Error { message } => {
                self.emit(SessionEvent::Error { message });
                self.end_session(EndReason::Error);
            }
        }
    }

    // ── synthesis events ──────────────────────────────────────

    fn handle_tts(&mut self, event: TtsEvent) {
        let now = Instant::now();
        match event {
            TtsEvent::Started { request_id } => {
                self.current_request = Some(request_id);
            }
            TtsEvent::AudioDelta { request_id, delta } => {
                // Late chunks of a cancelled synthesis are discarded here.
                if self.current_request != Some(request_id) {
                    return;
                }
                if let Some(manager) = &mut self.manager {
                    manager.on_agent_audio_started();
                }
                self.emit(SessionEvent::AudioDelta { bytes: delta });
            }
            TtsEvent::Done {
                request_id,
                total_bytes,
                error,
                ..
            } => {
                if self.current_request != Some(request_id) {
                    return;
                }
                self.current_request = None;
                self.synth_inflight = false;
                if let Some(message) = error {
                    warn!(%request_id, total_bytes, "synthesis truncated: {message}");
                }
                if !self.speak_queue.is_empty() {
                    self.maybe_start_synthesis();
                    return;
                }
                if !self.turn_streaming {
                    self.emit(SessionEvent::AudioDone);
                    if let Some(manager) = &mut self.manager {
                        manager.on_agent_audio_done(now);
                    }
                }
            }
            TtsEvent::Cancelled { request_id } => {
                debug!(%request_id, "synthesis cancelled");
                if self.current_request == Some(request_id) {
                    self.current_request = None;
                }
                self.synth_inflight = false;
                // A fast next turn may already have queued its reply.
                self.maybe_start_synthesis();
            }
        }
    }

    // ── turn events ───────────────────────────────────────────

    fn handle_turn(&mut self, event: TurnEvent) {
        let now = Instant::now();
        match event {
            TurnEvent::Token { delta } => {
                self.turn_buffer.push_str(&delta);
                if self.early_speak {
                    let tail = &self.turn_buffer[self.enqueued_len..];
                    let consumed = complete_sentences_len(tail);
                    if consumed > 0 {
                        let sentence =
                            self.turn_buffer[self.enqueued_len..self.enqueued_len + consumed]
                                .trim()
                                .to_owned();
                        self.enqueued_len += consumed;
                        if !sentence.is_empty() {
                            self.speak(sentence);
                        }
                    }
                }
            }
            TurnEvent::Completed(completion) => {
                self.turn_streaming = false;
                match *completion {
                    None => debug!("turn cancelled"),
                    Some(completion) => self.finish_turn(completion, now),
                }
            }
            TurnEvent::Failed { message } => {
                self.turn_streaming = false;
                self.emit(SessionEvent::Error { message });
                self.end_session(EndReason::Error);
            }
            TurnEvent::SynthesisFailed { message } => {
                self.synth_inflight = false;
                self.current_request = None;
                self.emit(SessionEvent::Error { message });
                if !self.speak_queue.is_empty() {
                    self.maybe_start_synthesis();
                } else if let Some(manager) = &mut self.manager {
                    manager.on_agent_turn_aborted(now);
                }
            }
        }
    }

    fn finish_turn(&mut self, completion: Completion, now: Instant) {
        if let Some(call) = completion.tool_call {
            self.pending_tool = Some(call.clone());
            self.emit(SessionEvent::FunctionCall {
                call_id: call.call_id,
                name: call.name,
                arguments: call.arguments,
            });
            // Wait state: the manager stays in thinking until the edge
            // returns a result via send_tool_result.
            return;
        }

        if completion.content.is_empty() {
            if let Some(manager) = &mut self.manager {
                manager.on_agent_turn_aborted(now);
            }
            return;
        }

        self.transcript_log.push(TranscriptEntry {
            role: TranscriptRole::Agent,
            text: completion.content.clone(),
        });
        self.emit(SessionEvent::AgentTranscript {
            text: completion.content.clone(),
        });

        // Anything not already queued by early-speak goes out now.
        let offset = self.enqueued_len.min(completion.content.len());
        let remaining = completion.content[offset..].trim().to_owned();
        if !remaining.is_empty() {
            self.speak(remaining);
        } else if !self.synth_inflight && self.speak_queue.is_empty() {
            // Early-speak already played the whole turn out.
            self.emit(SessionEvent::AudioDone);
            if let Some(manager) = &mut self.manager {
                manager.on_agent_audio_done(now);
            }
        }
    }

    // ── conversation signals ──────────────────────────────────

    fn process_signals(&mut self, signals: Vec<ConversationSignal>) {
        for signal in signals {
            match signal {
                ConversationSignal::GreetingRequested { text } => {
                    // The greeting is an assistant message, never a user turn.
                    self.llm.record_assistant(&text);
                    self.transcript_log.push(TranscriptEntry {
                        role: TranscriptRole::Agent,
                        text: text.clone(),
                    });
                    self.emit(SessionEvent::AgentTranscript { text: text.clone() });
                    self.speak(text);
                }
                ConversationSignal::SpeechStarted => {
                    self.emit(SessionEvent::SpeechStarted);
                }
                ConversationSignal::ResponseRequested { transcript } => {
                    self.start_turn(transcript);
                }
                ConversationSignal::AgentInterrupted => {
                    self.barge_in();
                }
                ConversationSignal::SilenceTimeout => {
                    self.emit(SessionEvent::SilenceTimeout);
                }
                ConversationSignal::ConversationEnded { reason } => {
                    self.emit_ended(reason);
                }
            }
        }
    }

    /// Cancel the agent mid-utterance: synthesis, queued audio and the
    /// in-flight generation all stop; the recognizer flushes its partial.
    fn barge_in(&mut self) {
        debug!(session_id = %self.session_id, "barge-in");
        self.tts.cancel();
        self.speak_queue.clear();
        self.llm.cancel();
        self.turn_streaming = false;
        self.turn_buffer.clear();
        self.enqueued_len = 0;
        self.stt.finalize(0);
    }

    // ── turn + synthesis plumbing ─────────────────────────────

    fn start_turn(&mut self, transcript: String) {
        self.turn_buffer.clear();
        self.enqueued_len = 0;
        self.turn_streaming = true;

        let llm = self.llm.clone();
        let turn_tx = self.turn_tx.clone();
        let (token_tx, mut token_rx) = mpsc::unbounded_channel::<String>();
        let forward_tx = self.turn_tx.clone();
        tokio::spawn(async move {
            while let Some(delta) = token_rx.recv().await {
                if forward_tx.send(TurnEvent::Token { delta }).is_err() {
                    break;
                }
            }
        });
        self.turn_task = Some(tokio::spawn(async move {
            match llm.generate_streaming(&transcript, token_tx).await {
                Ok(completion) => {
                    let _ = turn_tx.send(TurnEvent::Completed(Box::new(completion)));
                }
                Err(e) => {
                    let _ = turn_tx.send(TurnEvent::Failed {
                        message: e.to_string(),
                    });
                }
            }
        }));
    }

    fn start_followup_turn(&mut self) {
        self.turn_buffer.clear();
        self.enqueued_len = 0;
        self.turn_streaming = true;

        let llm = self.llm.clone();
        let turn_tx = self.turn_tx.clone();
        let (token_tx, mut token_rx) = mpsc::unbounded_channel::<String>();
        let forward_tx = self.turn_tx.clone();
        tokio::spawn(async move {
            while let Some(delta) = token_rx.recv().await {
                if forward_tx.send(TurnEvent::Token { delta }).is_err() {
                    break;
                }
            }
        });
        self.turn_task = Some(tokio::spawn(async move {
            match llm.continue_streaming(token_tx).await {
                Ok(completion) => {
                    let _ = turn_tx.send(TurnEvent::Completed(Box::new(completion)));
                }
                Err(e) => {
                    let _ = turn_tx.send(TurnEvent::Failed {
                        message: e.to_string(),
                    });
                }
            }
        }));
    }

    fn speak(&mut self, text: String) {
        self.speak_queue.push_back(text);
        self.maybe_start_synthesis();
    }

    fn maybe_start_synthesis(&mut self) {
        if self.synth_inflight {
            return;
        }
        let Some(text) = self.speak_queue.pop_front() else {
            return;
        };
        self.synth_inflight = true;
        let tts = Arc::clone(&self.tts);
        let tts_tx = self.tts_tx.clone();
        let turn_tx = self.turn_tx.clone();
        self.synth_task = Some(tokio::spawn(async move {
            if let Err(e) = tts.synthesize_streaming(&text, &tts_tx).await {
                let _ = turn_tx.send(TurnEvent::SynthesisFailed {
                    message: e.to_string(),
                });
            }
        }));
    }

    // ── teardown ──────────────────────────────────────────────

    fn handle_tick(&mut self) {
        let signals = match &mut self.manager {
            Some(manager) => manager.tick(Instant::now()),
            None => Vec::new(),
        };
        self.process_signals(signals);
    }

    fn end_session(&mut self, reason: EndReason) {
        if self.ended {
            return;
        }
        let signals = match &mut self.manager {
            Some(manager) => manager.end(reason),
            None => vec![ConversationSignal::ConversationEnded { reason }],
        };
        // Reverse dependency order: synthesis, generation, recognition.
        self.tts.cancel();
        self.llm.cancel();
        if reason == EndReason::Error {
            self.stt.cancel();
        } else {
            self.stt.stop();
        }
        self.process_signals(signals);
        self.ended = true;
    }

    fn emit_ended(&mut self, reason: EndReason) {
        let snapshot = self.metrics.snapshot(self.started.elapsed());
        let cost = CostBreakdown::compute(&snapshot, &self.pricing);
        let transcript = std::mem::take(&mut self.transcript_log);
        self.emit(SessionEvent::ConversationEnded {
            reason,
            metrics: snapshot,
            cost,
            transcript,
        });
        self.ended = true;
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Byte length of the leading run of complete sentences in `text`.
///
/// A sentence is complete at `.`, `!` or `?` followed by whitespace. Used
/// by early-speak to hand the synthesizer full sentences while the model
/// is still streaming.
fn complete_sentences_len(text: &str) -> usize {
    let mut consumed = 0;
    let mut iter = text.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if matches!(c, '.' | '!' | '?')
            && let Some((_, next)) = iter.peek()
            && next.is_whitespace()
        {
            consumed = i + c.len_utf8();
        }
    }
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmEndpoint;

    fn config() -> AgentConfig {
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
    fn session_identity() {
        let session = SessionOrchestrator::new("tenant-1", "agent-7", config());
        assert_eq!(session.tenant_id(), "tenant-1");
        assert_eq!(session.agent_id(), "agent-7");
        assert!(!session.is_in_call());
    }

    #[test]
    fn audio_dropped_before_connect() {
        let session = SessionOrchestrator::new("t", "a", config());
        let frame = AudioFrame::ulaw(vec![0xFFu8; 160]);
        assert!(!session.send_audio(&frame));
    }

    #[tokio::test]
    async fn connect_rejects_invalid_config() {
        let mut bad = config();
        bad.tts.voice.clear();
        let mut session = SessionOrchestrator::new("t", "a", bad);
        assert!(session.connect().await.is_err());
        assert!(!session.is_in_call());
    }

    #[test]
    fn sentence_boundary_detection() {
        assert_eq!(complete_sentences_len("Hello there. How"), 12);
        assert_eq!(complete_sentences_len("Hello there"), 0);
        assert_eq!(complete_sentences_len("One. Two! Thr"), 9);
        // Terminator at end of buffer: not yet complete (more may follow).
        assert_eq!(complete_sentences_len("Wait."), 0);
        assert_eq!(complete_sentences_len("3.14 is pi. Yes"), 11);
    }
}
